//! In-memory engine for integration tests: a small DOM tree, a selector
//! resolver for the selectors the crate produces, scripted event injection
//! and lifecycle counters.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pagetap::config::TimeoutConfig;
use pagetap::driver::{
    DomNode, Engine, EventStreams, FACTS_JS, INNER_TEXT_JS, LINEAGE_JS, LaunchOptions, NodeKind,
    PageDriver, TEXT_CONTENT_JS, VISIBLE_JS, poll_wait_state,
};
use pagetap::errors::BrowserError;
use pagetap::types::{
    ConsoleLevel, ConsoleLogEntry, KeyPress, NetworkRequestEntry, ResourceType, WaitState,
};
use pagetap::Automation;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: NodeKind,
    pub tag: String,
    pub id: String,
    pub class: Option<String>,
    pub input_type: Option<String>,
    /// Own text, not counting descendants
    pub text: String,
    pub visible: bool,
    pub stale: bool,
    pub inner_text_fails: bool,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub value: String,
}

/// Builder for one element
pub struct El(NodeData);

pub fn el(tag: &str) -> El {
    El(NodeData {
        kind: NodeKind::Element,
        tag: tag.to_string(),
        id: String::new(),
        class: None,
        input_type: None,
        text: String::new(),
        visible: true,
        stale: false,
        inner_text_fails: false,
        parent: None,
        children: Vec::new(),
        value: String::new(),
    })
}

pub fn text_node(text: &str) -> El {
    let mut node = el("#text");
    node.0.kind = NodeKind::Text;
    node.0.text = text.to_string();
    node
}

impl El {
    pub fn id(mut self, id: &str) -> Self {
        self.0.id = id.to_string();
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.0.class = Some(class.to_string());
        self
    }

    pub fn input_type(mut self, t: &str) -> Self {
        self.0.input_type = Some(t.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.0.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.0.visible = false;
        self
    }

    /// Make the rendered-text read fail
    pub fn inner_text_fails(mut self) -> Self {
        self.0.inner_text_fails = true;
        self
    }
}

#[derive(Default)]
pub struct Tree {
    nodes: Vec<NodeData>,
}

/// Shared document; node 0 is `<html>`, node 1 is `<body>`
#[derive(Clone)]
pub struct FakeDom(Arc<Mutex<Tree>>);

impl Default for FakeDom {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDom {
    pub fn new() -> Self {
        let dom = FakeDom(Arc::new(Mutex::new(Tree::default())));
        {
            let mut tree = dom.0.lock().unwrap();
            tree.nodes.push(el("html").0);
        }
        dom.append(0, el("body"));
        dom
    }

    pub const BODY: usize = 1;

    pub fn append(&self, parent: usize, node: El) -> usize {
        let mut tree = self.0.lock().unwrap();
        let mut data = node.0;
        data.parent = Some(parent);
        let id = tree.nodes.len();
        tree.nodes.push(data);
        tree.nodes[parent].children.push(id);
        id
    }

    pub fn set_visible(&self, id: usize, visible: bool) {
        self.0.lock().unwrap().nodes[id].visible = visible;
    }

    pub fn set_stale(&self, id: usize, stale: bool) {
        self.0.lock().unwrap().nodes[id].stale = stale;
    }

    /// Remove a node from its parent
    pub fn detach(&self, id: usize) {
        let mut tree = self.0.lock().unwrap();
        if let Some(parent) = tree.nodes[id].parent.take() {
            tree.nodes[parent].children.retain(|c| *c != id);
        }
    }

    pub fn value(&self, id: usize) -> String {
        self.0.lock().unwrap().nodes[id].value.clone()
    }

    pub fn node(&self, id: usize) -> FakeNode {
        FakeNode {
            dom: self.clone(),
            id,
        }
    }

    /// Element ids matching `selector`, in document order
    pub fn select(&self, selector: &str) -> Vec<usize> {
        let chain = parse_selector(selector);
        let tree = self.0.lock().unwrap();
        let mut out = Vec::new();
        let mut stack = vec![0usize];
        while let Some(id) = stack.pop() {
            let node = &tree.nodes[id];
            if node.kind == NodeKind::Element && matches_chain(&tree, id, &chain) {
                out.push(id);
            }
            for child in node.children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    nth: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Child,
    Descendant,
}

/// Compounds right to left, each with the combinator linking it to the next one leftwards
fn parse_selector(selector: &str) -> Vec<(Compound, Option<Combinator>)> {
    let mut parts: Vec<(Compound, Option<Combinator>)> = Vec::new();
    let mut pending = Combinator::Descendant;
    for token in selector.split_whitespace() {
        if token == ">" {
            pending = Combinator::Child;
            continue;
        }
        if let Some(last) = parts.last_mut() {
            last.1 = Some(pending);
        }
        parts.push((parse_compound(token), None));
        pending = Combinator::Descendant;
    }
    // Combinator stored on the left compound; shift it onto the right one
    let mut chain = Vec::new();
    let mut link = None;
    for (compound, next) in parts {
        chain.push((compound, link));
        link = next;
    }
    chain.reverse();
    chain
}

fn parse_compound(token: &str) -> Compound {
    let mut compound = Compound::default();
    let (base, nth) = match token.split_once(":nth-child(") {
        Some((base, rest)) => (base, rest.trim_end_matches(')').parse().ok()),
        None => (token, None),
    };
    compound.nth = nth;

    let mut current = String::new();
    let mut mode = 't';
    for ch in base.chars() {
        if ch == '#' || ch == '.' {
            flush(mode, &mut current, &mut compound);
            mode = ch;
        } else {
            current.push(ch);
        }
    }
    flush(mode, &mut current, &mut compound);
    compound
}

fn flush(mode: char, current: &mut String, compound: &mut Compound) {
    if current.is_empty() {
        return;
    }
    match mode {
        't' => compound.tag = Some(std::mem::take(current)),
        '#' => compound.id = Some(std::mem::take(current)),
        _ => compound.classes.push(std::mem::take(current)),
    }
}

fn position(tree: &Tree, id: usize) -> usize {
    match tree.nodes[id].parent {
        Some(parent) => {
            tree.nodes[parent]
                .children
                .iter()
                .filter(|c| tree.nodes[**c].kind == NodeKind::Element)
                .position(|c| *c == id)
                .map(|p| p + 1)
                .unwrap_or(0)
        }
        // The document has exactly one element child
        None if id == 0 => 1,
        None => 0,
    }
}

fn matches_compound(tree: &Tree, id: usize, compound: &Compound) -> bool {
    let node = &tree.nodes[id];
    if node.kind != NodeKind::Element {
        return false;
    }
    if compound.tag.as_deref().is_some_and(|t| t != node.tag) {
        return false;
    }
    if compound.id.as_deref().is_some_and(|i| i != node.id) {
        return false;
    }
    let classes: Vec<&str> = node
        .class
        .as_deref()
        .map(|c| c.split_whitespace().collect())
        .unwrap_or_default();
    if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
        return false;
    }
    compound.nth.is_none_or(|n| position(tree, id) == n)
}

fn matches_chain(tree: &Tree, id: usize, chain: &[(Compound, Option<Combinator>)]) -> bool {
    let Some(((compound, link), rest)) = chain.split_first() else {
        return true;
    };
    if !matches_compound(tree, id, compound) {
        return false;
    }
    match link {
        None => true,
        Some(Combinator::Child) => tree.nodes[id]
            .parent
            .is_some_and(|p| matches_chain(tree, p, rest)),
        Some(Combinator::Descendant) => {
            let mut cur = tree.nodes[id].parent;
            while let Some(p) = cur {
                if matches_chain(tree, p, rest) {
                    return true;
                }
                cur = tree.nodes[p].parent;
            }
            false
        }
    }
}

fn attached(tree: &Tree, id: usize) -> bool {
    let mut cur = id;
    loop {
        if cur == 0 {
            return true;
        }
        match tree.nodes[cur].parent {
            Some(p) => cur = p,
            None => return false,
        }
    }
}

fn text_of(tree: &Tree, id: usize, visible_only: bool) -> String {
    let node = &tree.nodes[id];
    if visible_only && !node.visible {
        return String::new();
    }
    let mut out = node.text.clone();
    for child in &node.children {
        out.push_str(&text_of(tree, *child, visible_only));
    }
    out
}

/// The `type` DOM property: form controls report a default when the attribute is absent
fn type_property(node: &NodeData) -> String {
    match (node.tag.as_str(), node.input_type.as_deref()) {
        ("input", None) => "text".to_string(),
        ("button", None) => "submit".to_string(),
        ("select", _) => "select-one".to_string(),
        ("textarea", _) => "textarea".to_string(),
        (_, t) => t.unwrap_or_default().to_string(),
    }
}

fn kind_name(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Element => "element",
        NodeKind::Text => "text",
        NodeKind::Document => "document",
        NodeKind::Other => "other",
    }
}

/// Handle to one node of a [`FakeDom`]
pub struct FakeNode {
    dom: FakeDom,
    pub id: usize,
}

#[async_trait]
impl DomNode for FakeNode {
    async fn evaluate(&self, js_function: &str) -> Result<Value, BrowserError> {
        let tree = self.dom.0.lock().unwrap();
        let node = &tree.nodes[self.id];
        if node.stale {
            return Err(BrowserError::StaleElement);
        }

        if js_function == FACTS_JS {
            Ok(json!({
                "kind": kind_name(node.kind),
                "tag": node.tag,
                "id": node.id,
                "className": node.class.clone().unwrap_or_default(),
                "inputType": type_property(node),
            }))
        } else if js_function == LINEAGE_JS {
            let mut steps = Vec::new();
            let mut cur = Some(self.id);
            while let Some(id) = cur {
                let n = &tree.nodes[id];
                if n.kind != NodeKind::Element {
                    steps.push(json!({ "kind": kind_name(n.kind), "position": 0 }));
                    break;
                }
                steps.push(json!({
                    "kind": "element",
                    "tag": n.tag,
                    "id": n.id,
                    "className": n.class.clone().unwrap_or_default(),
                    "position": position(&tree, id),
                }));
                cur = n.parent;
            }
            Ok(Value::Array(steps))
        } else if js_function == VISIBLE_JS {
            Ok(json!(
                node.kind == NodeKind::Element && node.visible && attached(&tree, self.id)
            ))
        } else if js_function == TEXT_CONTENT_JS {
            Ok(json!(text_of(&tree, self.id, false)))
        } else if js_function == INNER_TEXT_JS {
            if node.kind != NodeKind::Element || node.inner_text_fails {
                return Err(BrowserError::ScriptExecution {
                    script: js_function.to_string(),
                    message: "innerText is not available".to_string(),
                });
            }
            Ok(json!(text_of(&tree, self.id, true)))
        } else {
            Err(BrowserError::ScriptExecution {
                script: js_function.to_string(),
                message: "unsupported in fake DOM".to_string(),
            })
        }
    }

    async fn children(&self) -> Result<Vec<Self>, BrowserError> {
        let tree = self.dom.0.lock().unwrap();
        let node = &tree.nodes[self.id];
        if node.stale {
            return Err(BrowserError::StaleElement);
        }
        Ok(node
            .children
            .iter()
            .filter(|c| tree.nodes[**c].kind == NodeKind::Element)
            .map(|c| self.dom.node(*c))
            .collect())
    }
}

/// What the page was asked to do
#[derive(Default, Debug)]
pub struct PageLog {
    pub navigations: Vec<String>,
    pub reloads: usize,
    pub clicks: Vec<usize>,
    pub scripts: Vec<(String, Value)>,
    pub keys: Vec<KeyPress>,
}

type Feeds = (
    mpsc::UnboundedSender<ConsoleLogEntry>,
    mpsc::UnboundedSender<NetworkRequestEntry>,
);

/// Counters and hooks shared between a [`FakeEngine`] and the test
#[derive(Default)]
pub struct EngineState {
    pub launches: usize,
    pub browsers_open: usize,
    pub contexts_open: usize,
    pub pages_open: usize,
    pub shutdowns: usize,
    pub fail_new_page: bool,
    pub fail_close_page: bool,
    pub fail_close_context: bool,
    /// Release steps in the order they ran, failed ones included
    pub teardown: Vec<&'static str>,
    pub log: PageLog,
    feeds: Option<Feeds>,
}

#[derive(Clone, Default)]
pub struct FakeHandle(Arc<Mutex<EngineState>>);

impl FakeHandle {
    pub fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.0.lock().unwrap()
    }

    /// Push a console event into the live page's feed
    pub fn emit_console(&self, entry: ConsoleLogEntry) {
        if let Some((console, _)) = &self.state().feeds {
            let _ = console.send(entry);
        }
    }

    pub fn emit_request(&self, entry: NetworkRequestEntry) {
        if let Some((_, requests)) = &self.state().feeds {
            let _ = requests.send(entry);
        }
    }
}

pub struct FakeEngine {
    pub dom: FakeDom,
    pub handle: FakeHandle,
}

impl FakeEngine {
    pub fn new(dom: FakeDom) -> Self {
        Self {
            dom,
            handle: FakeHandle::default(),
        }
    }
}

pub struct FakePage {
    dom: FakeDom,
    handle: FakeHandle,
}

#[async_trait]
impl Engine for FakeEngine {
    type Browser = usize;
    type Context = usize;
    type Page = FakePage;

    async fn launch(&mut self, _options: &LaunchOptions) -> Result<usize, BrowserError> {
        let mut state = self.handle.state();
        state.launches += 1;
        state.browsers_open += 1;
        Ok(state.launches)
    }

    async fn new_context(&self, _browser: &usize) -> Result<usize, BrowserError> {
        let mut state = self.handle.state();
        state.contexts_open += 1;
        Ok(state.contexts_open)
    }

    async fn new_page(&self, _browser: &usize, _context: &usize) -> Result<FakePage, BrowserError> {
        let mut state = self.handle.state();
        if state.fail_new_page {
            return Err(BrowserError::driver("new_page", "target crashed"));
        }
        state.pages_open += 1;
        Ok(FakePage {
            dom: self.dom.clone(),
            handle: self.handle.clone(),
        })
    }

    async fn close_page(&self, _page: FakePage) -> Result<(), BrowserError> {
        let mut state = self.handle.state();
        state.teardown.push("page");
        state.feeds = None;
        if state.fail_close_page {
            return Err(BrowserError::driver("close page", "target already detached"));
        }
        state.pages_open -= 1;
        Ok(())
    }

    async fn close_context(&self, _browser: &usize, _context: usize) -> Result<(), BrowserError> {
        let mut state = self.handle.state();
        state.teardown.push("context");
        if state.fail_close_context {
            return Err(BrowserError::driver("dispose browser context", "no such context"));
        }
        state.contexts_open -= 1;
        Ok(())
    }

    async fn close_browser(&self, _browser: usize) -> Result<(), BrowserError> {
        let mut state = self.handle.state();
        state.teardown.push("browser");
        state.browsers_open -= 1;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), BrowserError> {
        let mut state = self.handle.state();
        state.teardown.push("engine");
        state.shutdowns += 1;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for FakePage {
    type Node = FakeNode;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.handle.state().log.navigations.push(url.to_string());
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.handle.state().log.reloads += 1;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let node = self
            .wait_for(selector, WaitState::Visible, timeout)
            .await?
            .ok_or_else(|| BrowserError::not_found(selector))?;
        self.handle.state().log.clicks.push(node.id);
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<(), BrowserError> {
        let node = self
            .wait_for(selector, WaitState::Visible, timeout)
            .await?
            .ok_or_else(|| BrowserError::not_found(selector))?;
        let mut tree = self.dom.0.lock().unwrap();
        let data = &mut tree.nodes[node.id];
        if data.tag != "input" && data.tag != "textarea" {
            return Err(BrowserError::driver("fill", "element not interactable"));
        }
        data.value = value.to_string();
        Ok(())
    }

    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<Option<FakeNode>, BrowserError> {
        poll_wait_state(self, selector, state, timeout, POLL).await
    }

    async fn execute_script(&self, script: &str, arg: Value) -> Result<Value, BrowserError> {
        self.handle
            .state()
            .log
            .scripts
            .push((script.to_string(), arg.clone()));
        if script.contains("throw") {
            return Err(BrowserError::ScriptExecution {
                script: script.to_string(),
                message: "Uncaught Error: boom".to_string(),
            });
        }
        Ok(json!({ "echo": arg }))
    }

    async fn query_one(&self, selector: &str) -> Result<Option<FakeNode>, BrowserError> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<FakeNode>, BrowserError> {
        Ok(self
            .dom
            .select(selector)
            .into_iter()
            .map(|id| self.dom.node(id))
            .collect())
    }

    async fn press_key(&self, key: &KeyPress) -> Result<(), BrowserError> {
        if key.key == "Hyper" {
            return Err(BrowserError::InvalidArgument("unknown key 'Hyper'".into()));
        }
        self.handle.state().log.keys.push(key.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStreams, BrowserError> {
        let (console_tx, console) = mpsc::unbounded_channel();
        let (request_tx, requests) = mpsc::unbounded_channel();
        self.handle.state().feeds = Some((console_tx, request_tx));
        Ok(EventStreams { console, requests })
    }
}

/// Automation over a fake engine with short timeouts
pub fn automation(dom: &FakeDom) -> (Automation<FakeEngine>, FakeHandle) {
    let engine = FakeEngine::new(dom.clone());
    let handle = engine.handle.clone();
    let timeouts = TimeoutConfig {
        action_ms: 200,
        operation_ms: 2000,
    };
    (
        Automation::new(engine, LaunchOptions::default(), timeouts),
        handle,
    )
}

pub async fn running(dom: &FakeDom) -> (Automation<FakeEngine>, FakeHandle) {
    let (mut automation, handle) = automation(dom);
    automation.start().await.unwrap();
    (automation, handle)
}

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
}

pub fn console(level: ConsoleLevel, text: &str, timestamp: DateTime<Utc>) -> ConsoleLogEntry {
    ConsoleLogEntry {
        level,
        text: text.to_string(),
        timestamp,
        location: None,
    }
}

pub fn request(url: &str, resource_type: ResourceType, timestamp: DateTime<Utc>) -> NetworkRequestEntry {
    NetworkRequestEntry {
        url: url.to_string(),
        method: "GET".to_string(),
        headers: BTreeMap::new(),
        timestamp,
        resource_type,
    }
}

/// Wait until the recorder has drained `console` and `requests` events
pub async fn settle(automation: &Automation<FakeEngine>, console: usize, requests: usize) {
    let recorder = automation.session().unwrap().recorder();
    for _ in 0..200 {
        if recorder.console_len().await == console && recorder.requests_len().await == requests {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "recorder never settled: {} console, {} requests",
        recorder.console_len().await,
        recorder.requests_len().await
    );
}
