//! Capability traits every browser backend implements.
//!
//! The automation core only talks to these traits; `cdp` and `webdriver`
//! provide the concrete engines.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::errors::BrowserError;
use crate::types::{ConsoleLogEntry, KeyPress, NetworkRequestEntry, ViewportSize, WaitState};

/// Describes a node: `{kind, tag, id, className, inputType}`.
/// `inputType` is the `type` property, so controls report their implicit type.
pub const FACTS_JS: &str = r#"function(node) {
    if (!node || node.nodeType !== 1) {
        return { kind: node && node.nodeType === 3 ? 'text' : (node && node.nodeType === 9 ? 'document' : 'other'),
                 tag: node ? node.nodeName.toLowerCase() : '', id: '', className: '', inputType: '' };
    }
    const cls = node.getAttribute('class');
    return {
        kind: 'element',
        tag: node.tagName.toLowerCase(),
        id: node.id || '',
        className: cls === null ? '' : cls,
        inputType: typeof node.type === 'string' ? node.type : (node.getAttribute('type') || '')
    };
}"#;

/// Ancestor walk, node first, stopping after the first non-element
pub const LINEAGE_JS: &str = r#"function(node) {
    const steps = [];
    let cur = node;
    while (cur) {
        if (cur.nodeType !== 1) {
            steps.push({ kind: cur.nodeType === 3 ? 'text' : (cur.nodeType === 9 ? 'document' : 'other'),
                         tag: '', id: '', className: '', position: 0 });
            break;
        }
        const parent = cur.parentNode;
        const position = parent && parent.children
            ? Array.prototype.indexOf.call(parent.children, cur) + 1
            : 0;
        const cls = cur.getAttribute('class');
        steps.push({
            kind: 'element',
            tag: cur.tagName.toLowerCase(),
            id: cur.id || '',
            className: cls === null ? '' : cls,
            position: position
        });
        cur = cur.parentElement;
    }
    return steps;
}"#;

/// Rendered and non-empty, the same rule Playwright applies
pub const VISIBLE_JS: &str = r#"function(node) {
    if (!node || node.nodeType !== 1 || !node.isConnected) return false;
    const style = window.getComputedStyle(node);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    const rect = node.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
}"#;

pub const TEXT_CONTENT_JS: &str = r#"function(node) { return node.textContent || ''; }"#;

pub const INNER_TEXT_JS: &str = r#"function(node) {
    if (node.nodeType !== 1) throw new Error('innerText is only defined on elements');
    return node.innerText || '';
}"#;

/// Wrap a function body so `arg` is bound and the result is awaited
pub fn wrap_function_body(script: &str) -> String {
    format!("(async function(arg) {{\n{}\n}})", script)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Element,
    Text,
    Document,
    Other,
}

/// Static attributes of one node
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFacts {
    pub kind: NodeKind,
    pub tag: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub input_type: String,
}

/// One hop of the ancestor walk
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageStep {
    pub kind: NodeKind,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
    /// 1-based index among the parent's element children, 0 when detached
    #[serde(default)]
    pub position: usize,
}

/// A live DOM node handle
#[async_trait]
pub trait DomNode: Sized + Send + Sync {
    /// Call a JS function expression (`function(node) { ... }`) with this
    /// node and return its JSON result.
    async fn evaluate(&self, js_function: &str) -> Result<Value, BrowserError>;

    /// Direct element children in DOM order
    async fn children(&self) -> Result<Vec<Self>, BrowserError>;

    async fn inner_text(&self) -> Result<String, BrowserError> {
        let value = self.evaluate(INNER_TEXT_JS).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn text_content(&self) -> Result<String, BrowserError> {
        let value = self.evaluate(TEXT_CONTENT_JS).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_visible(&self) -> Result<bool, BrowserError> {
        Ok(self.evaluate(VISIBLE_JS).await?.as_bool().unwrap_or(false))
    }

    async fn facts(&self) -> Result<NodeFacts, BrowserError> {
        let value = self.evaluate(FACTS_JS).await?;
        serde_json::from_value(value).map_err(|e| BrowserError::driver("read node", e))
    }

    async fn lineage(&self) -> Result<Vec<LineageStep>, BrowserError> {
        let value = self.evaluate(LINEAGE_JS).await?;
        serde_json::from_value(value).map_err(|e| BrowserError::driver("read lineage", e))
    }
}

/// Receivers for the two passive event feeds of a page
pub struct EventStreams {
    pub console: mpsc::UnboundedReceiver<ConsoleLogEntry>,
    pub requests: mpsc::UnboundedReceiver<NetworkRequestEntry>,
}

/// One open tab/page
#[async_trait]
pub trait PageDriver: Send + Sync {
    type Node: DomNode + 'static;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn reload(&self) -> Result<(), BrowserError>;

    /// Wait until the selector is visible, then click it
    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Wait until the selector is visible, then replace its value
    async fn fill(&self, selector: &str, value: &str, timeout: Duration)
    -> Result<(), BrowserError>;

    /// Resolve once `selector` reaches `state`. Returns the node for
    /// `visible`/`attached` and `None` for `hidden`/`detached`.
    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<Option<Self::Node>, BrowserError>;

    /// Evaluate a JS function expression, passing `arg` as its only parameter
    async fn execute_script(&self, script: &str, arg: Value) -> Result<Value, BrowserError>;

    async fn query_one(&self, selector: &str) -> Result<Option<Self::Node>, BrowserError>;

    async fn query_all(&self, selector: &str) -> Result<Vec<Self::Node>, BrowserError>;

    async fn press_key(&self, key: &KeyPress) -> Result<(), BrowserError>;

    /// Start delivering console and network events
    async fn subscribe(&self) -> Result<EventStreams, BrowserError>;
}

/// Browser start-up settings shared by both engines
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub viewport: Option<ViewportSize>,
    pub executable: Option<PathBuf>,
    /// Pause before every page interaction
    pub slow_mo: Option<Duration>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: None,
            executable: None,
            slow_mo: None,
        }
    }
}

/// A browser backend. Handles are acquired browser → context → page and
/// released in the reverse order.
#[async_trait]
pub trait Engine: Send + Sync {
    type Browser: Send + Sync;
    type Context: Send + Sync;
    type Page: PageDriver + 'static;

    async fn launch(&mut self, options: &LaunchOptions) -> Result<Self::Browser, BrowserError>;

    async fn new_context(&self, browser: &Self::Browser) -> Result<Self::Context, BrowserError>;

    async fn new_page(
        &self,
        browser: &Self::Browser,
        context: &Self::Context,
    ) -> Result<Self::Page, BrowserError>;

    async fn close_page(&self, page: Self::Page) -> Result<(), BrowserError>;

    async fn close_context(
        &self,
        browser: &Self::Browser,
        context: Self::Context,
    ) -> Result<(), BrowserError>;

    async fn close_browser(&self, browser: Self::Browser) -> Result<(), BrowserError>;

    /// Release engine-level resources (driver processes)
    async fn shutdown(&mut self) -> Result<(), BrowserError> {
        Ok(())
    }
}

/// Poll `selector` until it reaches `state` or `timeout` elapses.
pub async fn poll_wait_state<P: PageDriver + ?Sized>(
    page: &P,
    selector: &str,
    state: WaitState,
    timeout: Duration,
    interval: Duration,
) -> Result<Option<P::Node>, BrowserError> {
    let deadline = Instant::now() + timeout;

    loop {
        let node = page.query_one(selector).await?;
        let visible = match &node {
            Some(n) => match n.is_visible().await {
                Ok(v) => v,
                Err(e) if e.is_stale() => false,
                Err(e) => return Err(e),
            },
            None => false,
        };

        if state.is_satisfied(node.is_some(), visible) {
            return Ok(match state {
                WaitState::Visible | WaitState::Attached => node,
                WaitState::Hidden | WaitState::Detached => None,
            });
        }

        if Instant::now() >= deadline {
            return Err(BrowserError::timeout(
                format!("waiting for '{}' to be {}", selector, state),
                timeout,
            ));
        }
        tokio::time::sleep(interval).await;
    }
}
