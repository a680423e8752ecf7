//! Firefox/Chrome engine over WebDriver.
//!
//! WebDriver has no event feed, so console calls and outgoing requests are
//! captured by a page script and drained by a polling task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::key::Key;
use fantoccini::wd::WindowHandle;
use fantoccini::{Client, ClientBuilder, Locator};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::driver::{DomNode, Engine, EventStreams, LaunchOptions, PageDriver, poll_wait_state};
use crate::errors::{BrowserError, classify_message};
use crate::types::{
    ConsoleLevel, ConsoleLocation, ConsoleLogEntry, KeyPress, Modifier, NetworkRequestEntry,
    ResourceType, WaitState,
};
use crate::webdriver_manager::WebDriverManager;

const WAIT_POLL: Duration = Duration::from_millis(100);

/// Installs the capture hooks once per document, then hands back and empties
/// whatever was queued since the last call.
const DRAIN_EVENTS_JS: &str = r#"return (function() {
    if (!window.__pagetap) {
        const state = window.__pagetap = { console: [], requests: [] };
        const stringify = (arg) => {
            if (typeof arg === 'string') return arg;
            try {
                const s = JSON.stringify(arg);
                return s === undefined ? String(arg) : s;
            } catch (e) {
                return String(arg);
            }
        };
        const callSite = () => {
            const lines = (new Error().stack || '').split('\n').slice(3);
            for (const line of lines) {
                const m = line.match(/(\w+:\/\/[^\s()]+?):(\d+):(\d+)\)?\s*$/);
                if (m) return { url: m[1], lineNumber: +m[2], columnNumber: +m[3] };
            }
            return null;
        };
        const methods = ['log', 'debug', 'info', 'error', 'warn', 'dir', 'dirxml', 'table',
            'trace', 'clear', 'group', 'groupCollapsed', 'groupEnd', 'assert', 'profile',
            'profileEnd', 'count', 'timeEnd'];
        methods.forEach((method) => {
            const original = console[method];
            if (typeof original !== 'function') return;
            console[method] = function(...args) {
                if (method !== 'assert' || !args[0]) {
                    const shown = method === 'assert' ? args.slice(1) : args;
                    state.console.push({
                        type: method,
                        text: shown.map(stringify).join(' '),
                        timestamp: Date.now(),
                        location: callSite()
                    });
                }
                return original.apply(this, args);
            };
        });

        const record = (url, method, headers, type, ts) => state.requests.push({
            url: String(url),
            method: String(method || 'GET').toUpperCase(),
            headers: headers || {},
            timestamp: ts || Date.now(),
            resourceType: type
        });
        const headersOf = (h) => {
            const out = {};
            if (!h) return out;
            if (typeof h.forEach === 'function' && !Array.isArray(h)) {
                h.forEach((v, k) => { out[k] = String(v); });
            } else if (Array.isArray(h)) {
                h.forEach(([k, v]) => { out[k] = String(v); });
            } else {
                Object.keys(h).forEach((k) => { out[k] = String(h[k]); });
            }
            return out;
        };

        if (window.fetch) {
            const originalFetch = window.fetch;
            window.fetch = function(input, init) {
                try {
                    const req = input instanceof Request ? input : null;
                    const url = req ? req.url : new URL(String(input), window.location.href).href;
                    record(url, (init && init.method) || (req && req.method),
                        headersOf((init && init.headers) || (req && req.headers)), 'fetch');
                } catch (e) {}
                return originalFetch.apply(this, arguments);
            };
        }

        const xhr = XMLHttpRequest.prototype;
        const open = xhr.open, setHeader = xhr.setRequestHeader, send = xhr.send;
        xhr.open = function(method, url) {
            this.__pagetap = { method: method, url: url, headers: {} };
            return open.apply(this, arguments);
        };
        xhr.setRequestHeader = function(k, v) {
            if (this.__pagetap) this.__pagetap.headers[k] = String(v);
            return setHeader.apply(this, arguments);
        };
        xhr.send = function() {
            const r = this.__pagetap;
            if (r) {
                try { record(new URL(r.url, window.location.href).href, r.method, r.headers, 'xhr'); } catch (e) {}
            }
            return send.apply(this, arguments);
        };

        const kinds = { navigation: 'document', iframe: 'document', frame: 'document',
            link: 'stylesheet', css: 'stylesheet', img: 'image', image: 'image',
            script: 'script', video: 'media', audio: 'media', track: 'texttrack' };
        const observe = (entries) => entries.forEach((e) => {
            if (e.initiatorType === 'fetch' || e.initiatorType === 'xmlhttprequest') return;
            record(e.name, 'GET', {}, kinds[e.initiatorType] || 'other',
                Math.round(performance.timeOrigin + e.startTime));
        });
        try {
            new PerformanceObserver((list) => observe(list.getEntries()))
                .observe({ type: 'resource', buffered: true });
        } catch (e) {}
        observe(performance.getEntriesByType('navigation'));
    }
    const state = window.__pagetap;
    return { console: state.console.splice(0), requests: state.requests.splice(0) };
})();"#;

/// Supported WebDriver browsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BrowserType {
    /// Mozilla Firefox
    Firefox,
    /// Google Chrome/Chromium
    Chrome,
}

impl std::str::FromStr for BrowserType {
    type Err = anyhow::Error;

    /// Parse browser type from string (case-insensitive)
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "firefox" => Ok(BrowserType::Firefox),
            "chrome" | "chromium" => Ok(BrowserType::Chrome),
            _ => anyhow::bail!("Unsupported browser: {}", s),
        }
    }
}

impl std::fmt::Display for BrowserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserType::Firefox => write!(f, "firefox"),
            BrowserType::Chrome => write!(f, "chrome"),
        }
    }
}

impl BrowserType {
    /// Where an externally started driver usually listens
    pub fn default_url(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "http://localhost:4444",
            BrowserType::Chrome => "http://localhost:9515",
        }
    }

    pub fn driver_command(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "geckodriver",
            BrowserType::Chrome => "chromedriver",
        }
    }
}

fn map_cmd(operation: &str, selector: Option<&str>, err: CmdError) -> BrowserError {
    if err.is_miss() {
        return BrowserError::not_found(selector.unwrap_or_default());
    }
    let message = err.to_string();
    if message.to_lowercase().contains("javascript error") {
        return BrowserError::ScriptExecution {
            script: selector.unwrap_or_default().to_string(),
            message,
        };
    }
    classify_message(operation, selector, message)
}

/// WebDriver backend. Starts its own driver unless `webdriver_url` is given.
pub struct WebDriverEngine {
    browser_type: BrowserType,
    webdriver_url: Option<String>,
    poll_interval: Duration,
    manager: WebDriverManager,
}

impl WebDriverEngine {
    pub fn new(
        browser_type: BrowserType,
        webdriver_url: Option<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            browser_type,
            webdriver_url,
            poll_interval,
            manager: WebDriverManager::new(),
        }
    }

    pub fn from_config(browser_type: BrowserType, config: &Config) -> Self {
        Self::new(
            browser_type,
            config.browser.webdriver_url.clone(),
            Duration::from_millis(config.capture.poll_interval_ms),
        )
    }

    async fn driver_url(&mut self) -> Result<String, BrowserError> {
        match &self.webdriver_url {
            Some(url) => Ok(url.clone()),
            None => self
                .manager
                .ensure_driver(self.browser_type)
                .await
                .map_err(|e| BrowserError::Launch(format!("{:#}", e))),
        }
    }

    fn capabilities(
        &self,
        options: &LaunchOptions,
    ) -> Result<(serde_json::Map<String, Value>, Option<TempDir>), BrowserError> {
        let mut caps = serde_json::Map::new();

        match self.browser_type {
            BrowserType::Firefox => {
                let mut args = Vec::new();
                if options.headless {
                    args.push("--headless".to_string());
                }
                if let Some(vp) = &options.viewport {
                    args.push(format!("--width={}", vp.width));
                    args.push(format!("--height={}", vp.height));
                }
                caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
                Ok((caps, None))
            }
            BrowserType::Chrome => {
                // Chrome refuses to share a profile directory between sessions
                let profile = tempfile::Builder::new()
                    .prefix("pagetap-chrome-")
                    .tempdir()
                    .map_err(|e| BrowserError::Launch(format!("profile directory: {}", e)))?;

                let mut args = vec![
                    "--no-sandbox".to_string(),
                    "--disable-dev-shm-usage".to_string(),
                ];
                if options.headless {
                    args.push("--headless=new".to_string());
                    args.push("--disable-gpu".to_string());
                }
                if let Some(vp) = &options.viewport {
                    args.push(format!("--window-size={},{}", vp.width, vp.height));
                }
                args.push(format!("--user-data-dir={}", profile.path().display()));

                let mut chrome_opts = json!({ "args": args });
                if let Some(path) = &options.executable {
                    chrome_opts["binary"] = json!(path.display().to_string());
                }
                caps.insert("goog:chromeOptions".to_string(), chrome_opts);
                Ok((caps, Some(profile)))
            }
        }
    }
}

/// A WebDriver session
pub struct WebDriverBrowser {
    client: Client,
    _profile: Option<TempDir>,
}

/// One tab inside the session
pub struct WebDriverPage {
    client: Client,
    handle: WindowHandle,
    poll_interval: Duration,
}

pub struct WebDriverNode {
    client: Client,
    element: Element,
}

#[async_trait]
impl Engine for WebDriverEngine {
    type Browser = WebDriverBrowser;
    /// The session's original window; each page is a new tab beside it
    type Context = WindowHandle;
    type Page = WebDriverPage;

    async fn launch(&mut self, options: &LaunchOptions) -> Result<WebDriverBrowser, BrowserError> {
        info!("Connecting to {:?} WebDriver", self.browser_type);
        let url = self.driver_url().await?;
        let (caps, profile) = self.capabilities(options)?;

        debug!("Connecting to WebDriver at {}", url);
        let client = match ClientBuilder::rustls()
            .capabilities(caps.clone())
            .connect(&url)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                let error_str = e.to_string();
                let wedged = error_str.contains("Session is already started")
                    || error_str.contains("session not created");
                if !wedged || self.webdriver_url.is_some() {
                    return Err(BrowserError::Launch(format!(
                        "Failed to connect to WebDriver at {}: {}",
                        url, e
                    )));
                }

                info!("WebDriver appears to be in a bad state, attempting recovery...");
                self.manager.stop();
                tokio::time::sleep(Duration::from_millis(500)).await;
                let url = self.driver_url().await?;
                ClientBuilder::rustls()
                    .capabilities(caps)
                    .connect(&url)
                    .await
                    .map_err(|e| {
                        BrowserError::Launch(format!(
                            "Failed to connect to WebDriver after restart: {}",
                            e
                        ))
                    })?
            }
        };

        if let Some(vp) = &options.viewport {
            debug!("Setting viewport to {}x{}", vp.width, vp.height);
            if let Err(e) = client.set_window_size(vp.width, vp.height).await {
                debug!("Note: Could not set window size: {}", e);
            }
        }

        Ok(WebDriverBrowser {
            client,
            _profile: profile,
        })
    }

    async fn new_context(&self, browser: &WebDriverBrowser) -> Result<WindowHandle, BrowserError> {
        browser
            .client
            .window()
            .await
            .map_err(|e| map_cmd("current window", None, e))
    }

    async fn new_page(
        &self,
        browser: &WebDriverBrowser,
        _context: &WindowHandle,
    ) -> Result<WebDriverPage, BrowserError> {
        let tab = browser
            .client
            .new_window(true)
            .await
            .map_err(|e| map_cmd("open tab", None, e))?;
        browser
            .client
            .switch_to_window(tab.handle.clone())
            .await
            .map_err(|e| map_cmd("switch tab", None, e))?;

        Ok(WebDriverPage {
            client: browser.client.clone(),
            handle: tab.handle,
            poll_interval: self.poll_interval,
        })
    }

    async fn close_page(&self, page: WebDriverPage) -> Result<(), BrowserError> {
        page.client
            .switch_to_window(page.handle)
            .await
            .map_err(|e| map_cmd("switch tab", None, e))?;
        page.client
            .close_window()
            .await
            .map_err(|e| map_cmd("close tab", None, e))
    }

    async fn close_context(
        &self,
        browser: &WebDriverBrowser,
        context: WindowHandle,
    ) -> Result<(), BrowserError> {
        browser
            .client
            .switch_to_window(context)
            .await
            .map_err(|e| map_cmd("switch window", None, e))
    }

    async fn close_browser(&self, browser: WebDriverBrowser) -> Result<(), BrowserError> {
        browser
            .client
            .close()
            .await
            .map_err(|e| map_cmd("close session", None, e))
    }

    async fn shutdown(&mut self) -> Result<(), BrowserError> {
        self.manager.stop();
        Ok(())
    }
}

impl WebDriverPage {
    fn node(&self, element: Element) -> WebDriverNode {
        WebDriverNode {
            client: self.client.clone(),
            element,
        }
    }

    async fn wait_until_loaded(&self) {
        // Max 2 seconds
        for _ in 0..20 {
            match self
                .client
                .execute("return document.readyState === 'complete';", vec![])
                .await
            {
                Ok(val) if val.as_bool().unwrap_or(false) => break,
                _ => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    }

    /// Install the capture hooks on a fresh document without draining
    async fn install_capture(&self) {
        if let Err(e) = self.client.execute(DRAIN_EVENTS_JS, vec![]).await {
            debug!("Could not install event capture: {}", e);
        }
    }
}

/// Character sequence WebDriver uses for a named key
fn key_chars(key: &str) -> Result<String, BrowserError> {
    let named = match key {
        "Enter" => Key::Enter,
        "Tab" => Key::Tab,
        "Escape" => Key::Escape,
        "Backspace" => Key::Backspace,
        "Delete" => Key::Delete,
        "ArrowUp" => Key::Up,
        "ArrowDown" => Key::Down,
        "ArrowLeft" => Key::Left,
        "ArrowRight" => Key::Right,
        "Home" => Key::Home,
        "End" => Key::End,
        "PageUp" => Key::PageUp,
        "PageDown" => Key::PageDown,
        "Insert" => Key::Insert,
        "Space" => Key::Space,
        "Shift" => Key::Shift,
        "Control" => Key::Control,
        "Alt" => Key::Alt,
        "Meta" => Key::Meta,
        k if k.chars().count() == 1 => return Ok(k.to_string()),
        other => {
            return Err(BrowserError::InvalidArgument(format!(
                "unknown key '{}'",
                other
            )));
        }
    };
    Ok(char::from(named).to_string())
}

fn modifier_key(modifier: Modifier) -> Key {
    match modifier {
        Modifier::Alt => Key::Alt,
        Modifier::Control => Key::Control,
        Modifier::Meta => Key::Meta,
        Modifier::Shift => Key::Shift,
    }
}

#[async_trait]
impl PageDriver for WebDriverPage {
    type Node = WebDriverNode;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        info!("Navigating to {}", url);
        self.client
            .goto(url)
            .await
            .map_err(|e| map_cmd("navigate", None, e))?;
        self.wait_until_loaded().await;
        self.install_capture().await;
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.client
            .refresh()
            .await
            .map_err(|e| map_cmd("reload", None, e))?;
        self.wait_until_loaded().await;
        self.install_capture().await;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let node = self
            .wait_for(selector, WaitState::Visible, timeout)
            .await?
            .ok_or_else(|| BrowserError::not_found(selector))?;
        debug!("Clicking {}", selector);
        node.element
            .click()
            .await
            .map_err(|e| map_cmd("click", Some(selector), e))
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<(), BrowserError> {
        let node = self
            .wait_for(selector, WaitState::Visible, timeout)
            .await?
            .ok_or_else(|| BrowserError::not_found(selector))?;
        node.element
            .clear()
            .await
            .map_err(|e| map_cmd("clear", Some(selector), e))?;
        node.element
            .send_keys(value)
            .await
            .map_err(|e| map_cmd("type", Some(selector), e))
    }

    async fn wait_for(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<Option<WebDriverNode>, BrowserError> {
        poll_wait_state(self, selector, state, timeout, WAIT_POLL).await
    }

    async fn execute_script(&self, script: &str, arg: Value) -> Result<Value, BrowserError> {
        let body = format!("return ({})(arguments[0]);", script);
        self.client
            .execute(&body, vec![arg])
            .await
            .map_err(|e| map_cmd("execute script", Some(script), e))
    }

    async fn query_one(&self, selector: &str) -> Result<Option<WebDriverNode>, BrowserError> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<WebDriverNode>, BrowserError> {
        let elements = self
            .client
            .find_all(Locator::Css(selector))
            .await
            .map_err(|e| map_cmd("query", Some(selector), e))?;
        Ok(elements.into_iter().map(|e| self.node(e)).collect())
    }

    async fn press_key(&self, key: &KeyPress) -> Result<(), BrowserError> {
        let mut sequence = String::new();
        if let Some(modifier) = key.modifier {
            sequence.push(char::from(modifier_key(modifier)));
        }
        sequence.push_str(&key_chars(&key.key)?);
        // Release held modifiers
        sequence.push(char::from(Key::Null));

        let target = self
            .client
            .active_element()
            .await
            .map_err(|e| map_cmd("active element", None, e))?;
        target
            .send_keys(&sequence)
            .await
            .map_err(|e| map_cmd("press_key", None, e))
    }

    async fn subscribe(&self) -> Result<EventStreams, BrowserError> {
        let (console_tx, console) = mpsc::unbounded_channel();
        let (request_tx, requests) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let interval = self.poll_interval;

        self.install_capture().await;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if console_tx.is_closed() && request_tx.is_closed() {
                    break;
                }

                let drained = match client.execute(DRAIN_EVENTS_JS, vec![]).await {
                    Ok(value) => value,
                    Err(e) => {
                        let err = map_cmd("drain events", None, e);
                        if err.is_fatal() {
                            debug!("Event pump stopping: {}", err);
                            break;
                        }
                        // Mid-navigation; the next document gets fresh hooks
                        debug!("Event drain skipped: {}", err);
                        continue;
                    }
                };

                let batch: DrainedEvents = match serde_json::from_value(drained) {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!("Skipping malformed event batch: {}", e);
                        continue;
                    }
                };
                for raw in batch.console {
                    match serde_json::from_value::<RawConsole>(raw) {
                        Ok(entry) => {
                            let _ = console_tx.send(entry.into());
                        }
                        Err(e) => warn!("Skipping malformed console event: {}", e),
                    }
                }
                for raw in batch.requests {
                    match serde_json::from_value::<RawRequest>(raw) {
                        Ok(entry) => {
                            let _ = request_tx.send(entry.into());
                        }
                        Err(e) => warn!("Skipping malformed network event: {}", e),
                    }
                }
            }
        });

        Ok(EventStreams { console, requests })
    }
}

#[derive(Deserialize)]
struct DrainedEvents {
    #[serde(default)]
    console: Vec<Value>,
    #[serde(default)]
    requests: Vec<Value>,
}

#[derive(Deserialize)]
struct RawConsole {
    #[serde(rename = "type")]
    kind: String,
    text: String,
    timestamp: f64,
    #[serde(default)]
    location: Option<ConsoleLocation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    url: String,
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    timestamp: f64,
    resource_type: String,
}

fn from_epoch_millis(ms: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(Utc::now)
}

impl From<RawConsole> for ConsoleLogEntry {
    fn from(raw: RawConsole) -> Self {
        ConsoleLogEntry {
            level: ConsoleLevel::from_engine(&raw.kind),
            text: raw.text,
            timestamp: from_epoch_millis(raw.timestamp),
            location: raw.location,
        }
    }
}

impl From<RawRequest> for NetworkRequestEntry {
    fn from(raw: RawRequest) -> Self {
        NetworkRequestEntry {
            url: raw.url,
            method: raw.method,
            headers: raw.headers,
            timestamp: from_epoch_millis(raw.timestamp),
            resource_type: ResourceType::from_engine(&raw.resource_type),
        }
    }
}

#[async_trait]
impl DomNode for WebDriverNode {
    async fn evaluate(&self, js_function: &str) -> Result<Value, BrowserError> {
        let element =
            serde_json::to_value(&self.element).map_err(|e| BrowserError::driver("evaluate", e))?;
        self.client
            .execute(&format!("return ({})(arguments[0]);", js_function), vec![element])
            .await
            .map_err(|e| match map_cmd("evaluate", None, e) {
                BrowserError::ScriptExecution { message, .. } => BrowserError::ScriptExecution {
                    script: js_function.to_string(),
                    message,
                },
                other => other,
            })
    }

    async fn children(&self) -> Result<Vec<Self>, BrowserError> {
        let elements = self
            .element
            .find_all(Locator::Css(":scope > *"))
            .await
            .map_err(|e| map_cmd("children", None, e))?;
        Ok(elements
            .into_iter()
            .map(|element| WebDriverNode {
                client: self.client.clone(),
                element,
            })
            .collect())
    }

    async fn inner_text(&self) -> Result<String, BrowserError> {
        self.element
            .text()
            .await
            .map_err(|e| map_cmd("inner_text", None, e))
    }
}

#[cfg(test)]
#[path = "webdriver_test.rs"]
mod webdriver_test;
