//! Chrome/Chromium engine over the DevTools protocol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::{self, EventRequestWillBeSent};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    self, EvaluateParams, EventConsoleApiCalled, ExceptionDetails, RemoteObject,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::{DomNode, Engine, EventStreams, LaunchOptions, PageDriver, poll_wait_state};
use crate::errors::{BrowserError, classify_message};
use crate::types::{
    ConsoleLevel, ConsoleLocation, ConsoleLogEntry, KeyPress, Modifier, NetworkRequestEntry,
    ResourceType, ViewportSize, WaitState,
};

const WAIT_POLL: Duration = Duration::from_millis(100);

/// Replace an input's value the way a user edit would, firing input/change
const FILL_JS: &str = r#"function(node, value) {
    if (node.isContentEditable) {
        node.focus();
        node.textContent = value;
    } else if ('value' in node) {
        if (node.disabled || node.readOnly) throw new Error('element is not editable');
        node.focus();
        if (typeof node.select === 'function') node.select();
        node.value = value;
    } else {
        throw new Error('element is not an <input>, <textarea> or contenteditable');
    }
    node.dispatchEvent(new Event('input', { bubbles: true }));
    node.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
}"#;

fn map_cdp(operation: &str, selector: Option<&str>, err: CdpError) -> BrowserError {
    match err {
        CdpError::JavascriptException(details) => BrowserError::ScriptExecution {
            script: selector.unwrap_or_default().to_string(),
            message: exception_message(&details),
        },
        CdpError::Timeout => BrowserError::timeout(operation, Duration::ZERO),
        other => classify_message(operation, selector, other.to_string()),
    }
}

fn exception_message(details: &ExceptionDetails) -> String {
    details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .unwrap_or_else(|| details.text.clone())
}

fn from_epoch_millis(ms: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}

/// Stateless apart from the viewport applied to new pages
#[derive(Default)]
pub struct CdpEngine {
    viewport: Option<ViewportSize>,
}

impl CdpEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A launched Chrome process and the task pumping its websocket
pub struct CdpBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    _profile: TempDir,
}

pub struct CdpPage {
    page: Page,
}

pub struct CdpNode {
    element: Element,
}

#[async_trait]
impl Engine for CdpEngine {
    type Browser = CdpBrowser;
    type Context = BrowserContextId;
    type Page = CdpPage;

    async fn launch(&mut self, options: &LaunchOptions) -> Result<CdpBrowser, BrowserError> {
        let profile = tempfile::Builder::new()
            .prefix("pagetap-chrome-")
            .tempdir()
            .map_err(|e| BrowserError::Launch(format!("profile directory: {}", e)))?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(vp) = &options.viewport {
            builder = builder.window_size(vp.width, vp.height);
        }
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        info!("Launching Chrome (headless: {})", options.headless);
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        self.viewport = options.viewport.clone();
        Ok(CdpBrowser {
            browser,
            handler,
            _profile: profile,
        })
    }

    async fn new_context(&self, browser: &CdpBrowser) -> Result<BrowserContextId, BrowserError> {
        let response = browser
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| map_cdp("create browser context", None, e))?;
        debug!("Created browser context {:?}", response.result.browser_context_id);
        Ok(response.result.browser_context_id.clone())
    }

    async fn new_page(
        &self,
        browser: &CdpBrowser,
        context: &BrowserContextId,
    ) -> Result<CdpPage, BrowserError> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context.clone())
            .build()
            .map_err(|e| BrowserError::driver("open page", e))?;
        let page = browser
            .browser
            .new_page(params)
            .await
            .map_err(|e| map_cdp("open page", None, e))?;

        if let Some(vp) = &self.viewport {
            let metrics = SetDeviceMetricsOverrideParams::new(vp.width as i64, vp.height as i64, 1.0, false);
            if let Err(e) = page.execute(metrics).await {
                debug!("Could not set viewport: {}", e);
            }
        }
        Ok(CdpPage { page })
    }

    async fn close_page(&self, page: CdpPage) -> Result<(), BrowserError> {
        page.page
            .close()
            .await
            .map_err(|e| map_cdp("close page", None, e))
    }

    async fn close_context(
        &self,
        browser: &CdpBrowser,
        context: BrowserContextId,
    ) -> Result<(), BrowserError> {
        browser
            .browser
            .execute(DisposeBrowserContextParams::new(context))
            .await
            .map(|_| ())
            .map_err(|e| map_cdp("dispose browser context", None, e))
    }

    async fn close_browser(&self, browser: CdpBrowser) -> Result<(), BrowserError> {
        let CdpBrowser {
            mut browser,
            handler,
            _profile,
        } = browser;

        let closed = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| map_cdp("close browser", None, e));
        if let Err(e) = browser.wait().await {
            debug!("Chrome process wait failed: {}", e);
        }
        handler.abort();
        closed
    }
}

impl CdpPage {
    async fn first(&self, selector: &str) -> Result<Option<CdpNode>, BrowserError> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn dispatch_key(
        &self,
        kind: DispatchKeyEventType,
        key: &str,
        text: Option<&str>,
        modifiers: i64,
    ) -> Result<(), BrowserError> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key.to_string())
            .modifiers(modifiers);
        if let Some((code, vk)) = key_code(key) {
            builder = builder
                .code(code.to_string())
                .windows_virtual_key_code(vk)
                .native_virtual_key_code(vk);
        }
        if let Some(text) = text {
            builder = builder.text(text.to_string());
        }
        let params = builder
            .build()
            .map_err(|e| BrowserError::InvalidArgument(format!("key '{}': {}", key, e)))?;
        self.page
            .execute(params)
            .await
            .map(|_| ())
            .map_err(|e| map_cdp("press_key", None, e))
    }
}

/// DOM `code` and virtual key code for named keys
fn key_code(key: &str) -> Option<(&'static str, i64)> {
    Some(match key {
        "Enter" => ("Enter", 13),
        "Tab" => ("Tab", 9),
        "Escape" => ("Escape", 27),
        "Backspace" => ("Backspace", 8),
        "Delete" => ("Delete", 46),
        "ArrowUp" => ("ArrowUp", 38),
        "ArrowDown" => ("ArrowDown", 40),
        "ArrowLeft" => ("ArrowLeft", 37),
        "ArrowRight" => ("ArrowRight", 39),
        "Home" => ("Home", 36),
        "End" => ("End", 35),
        "PageUp" => ("PageUp", 33),
        "PageDown" => ("PageDown", 34),
        " " | "Space" => ("Space", 32),
        _ => return None,
    })
}

/// Text a key inserts, if any, once modifiers are taken into account
fn key_text(press: &KeyPress) -> Option<String> {
    if matches!(
        press.modifier,
        Some(Modifier::Control | Modifier::Alt | Modifier::Meta)
    ) {
        return None;
    }
    match press.key.as_str() {
        "Enter" => Some("\r".into()),
        "Tab" => Some("\t".into()),
        "Space" => Some(" ".into()),
        k if k.chars().count() == 1 => Some(k.to_string()),
        _ => None,
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    type Node = CdpNode;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| map_cdp("navigate", None, e))
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.page
            .reload()
            .await
            .map(|_| ())
            .map_err(|e| map_cdp("reload", None, e))
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let node = self
            .wait_for(selector, WaitState::Visible, timeout)
            .await?
            .ok_or_else(|| BrowserError::not_found(selector))?;
        node.element
            .click()
            .await
            .map(|_| ())
            .map_err(|e| map_cdp("click", Some(selector), e))
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<(), BrowserError> {
        let node = self
            .wait_for(selector, WaitState::Visible, timeout)
            .await?
            .ok_or_else(|| BrowserError::not_found(selector))?;
        let value = serde_json::to_string(value).map_err(|e| BrowserError::driver("fill", e))?;
        let call = format!("function(node) {{ return ({})(node, {}); }}", FILL_JS, value);
        node.evaluate(&call).await.map(|_| ())
    }

    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<Option<CdpNode>, BrowserError> {
        poll_wait_state(self, selector, state, timeout, WAIT_POLL).await
    }

    async fn execute_script(&self, script: &str, arg: Value) -> Result<Value, BrowserError> {
        let arg = serde_json::to_string(&arg).map_err(|e| BrowserError::driver("serialize arg", e))?;
        let params = EvaluateParams::builder()
            .expression(format!("({})({})", script, arg))
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| BrowserError::driver("execute script", e))?;

        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| map_cdp("execute script", Some(script), e))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn query_one(&self, selector: &str) -> Result<Option<CdpNode>, BrowserError> {
        self.first(selector).await
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<CdpNode>, BrowserError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| map_cdp("query", Some(selector), e))?;
        Ok(elements.into_iter().map(|element| CdpNode { element }).collect())
    }

    async fn press_key(&self, key: &KeyPress) -> Result<(), BrowserError> {
        let modifiers = key.modifier.map(|m| m.cdp_bit()).unwrap_or(0);
        let text = key_text(key);
        self.dispatch_key(DispatchKeyEventType::KeyDown, &key.key, text.as_deref(), modifiers)
            .await?;
        self.dispatch_key(DispatchKeyEventType::KeyUp, &key.key, None, modifiers)
            .await
    }

    async fn subscribe(&self) -> Result<EventStreams, BrowserError> {
        let mut console_events = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| map_cdp("subscribe console", None, e))?;
        let mut request_events = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| map_cdp("subscribe network", None, e))?;

        self.page
            .execute(runtime::EnableParams::default())
            .await
            .map_err(|e| map_cdp("enable runtime", None, e))?;
        self.page
            .execute(network::EnableParams::default())
            .await
            .map_err(|e| map_cdp("enable network", None, e))?;

        let (console_tx, console) = mpsc::unbounded_channel();
        let (request_tx, requests) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                if console_tx.send(console_entry(&event)).is_err() {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            while let Some(event) = request_events.next().await {
                match request_entry(&event) {
                    Ok(entry) => {
                        if request_tx.send(entry).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping malformed network event: {}", e),
                }
            }
        });

        Ok(EventStreams { console, requests })
    }
}

fn console_entry(event: &EventConsoleApiCalled) -> ConsoleLogEntry {
    let text = event
        .args
        .iter()
        .map(remote_object_text)
        .collect::<Vec<_>>()
        .join(" ");
    let location = event
        .stack_trace
        .as_ref()
        .and_then(|trace| trace.call_frames.first())
        .map(|frame| ConsoleLocation {
            url: frame.url.clone(),
            line_number: frame.line_number.max(0) as u32,
            column_number: frame.column_number.max(0) as u32,
        });

    ConsoleLogEntry {
        level: ConsoleLevel::from_engine(event.r#type.as_ref()),
        text,
        timestamp: from_epoch_millis(*event.timestamp.inner()),
        location,
    }
}

fn remote_object_text(obj: &RemoteObject) -> String {
    match &obj.value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => obj
            .description
            .clone()
            .or_else(|| obj.unserializable_value.as_ref().map(|v| v.inner().clone()))
            .unwrap_or_else(|| obj.r#type.as_ref().to_string()),
    }
}

fn request_entry(event: &EventRequestWillBeSent) -> Result<NetworkRequestEntry, String> {
    let headers = match serde_json::to_value(&event.request.headers).map_err(|e| e.to_string())? {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        Value::Null => BTreeMap::new(),
        other => return Err(format!("headers is not an object: {}", other)),
    };

    Ok(NetworkRequestEntry {
        url: event.request.url.clone(),
        method: event.request.method.clone(),
        headers,
        timestamp: from_epoch_millis(*event.wall_time.inner() * 1000.0),
        resource_type: event
            .r#type
            .as_ref()
            .map(|t| ResourceType::from_engine(t.as_ref()))
            .unwrap_or(ResourceType::Other),
    })
}

#[async_trait]
impl DomNode for CdpNode {
    async fn evaluate(&self, js_function: &str) -> Result<Value, BrowserError> {
        let declaration = format!(
            "function() {{ return JSON.stringify(({})(this)); }}",
            js_function
        );
        let returns = self
            .element
            .call_js_fn(declaration, true)
            .await
            .map_err(|e| map_cdp("evaluate", None, e))?;

        if let Some(details) = &returns.exception_details {
            let message = exception_message(details);
            return Err(match classify_message("evaluate", None, message.clone()) {
                BrowserError::StaleElement => BrowserError::StaleElement,
                _ => BrowserError::ScriptExecution {
                    script: js_function.to_string(),
                    message,
                },
            });
        }

        match &returns.result.value {
            Some(Value::String(json)) => serde_json::from_str(json)
                .map_err(|e| BrowserError::driver("decode evaluate result", e)),
            _ => Ok(Value::Null),
        }
    }

    async fn children(&self) -> Result<Vec<Self>, BrowserError> {
        let elements = self
            .element
            .find_elements(":scope > *")
            .await
            .map_err(|e| map_cdp("children", None, e))?;
        Ok(elements.into_iter().map(|element| CdpNode { element }).collect())
    }

    async fn inner_text(&self) -> Result<String, BrowserError> {
        self.element
            .inner_text()
            .await
            .map(|text| text.unwrap_or_default())
            .map_err(|e| map_cdp("inner_text", None, e))
    }
}

#[cfg(test)]
#[path = "cdp_test.rs"]
mod cdp_test;
