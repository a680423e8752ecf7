use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, TimeoutConfig};
use crate::driver::{DomNode, Engine, LaunchOptions, PageDriver, wrap_function_body};
use crate::errors::BrowserError;
use crate::query::EventQuery;
use crate::recorder::EventRecorder;
use crate::summarizer::{self, SummaryOptions};
use crate::types::{
    ConsoleLogEntry, ElementSnapshot, KeyPress, NetworkRequestEntry, ResourceType, WaitState,
};

/// Slack added on top of an action timeout before the outer deadline fires
const ACTION_GRACE: Duration = Duration::from_secs(2);

/// Handles owned by one running session
pub struct BrowserSession<E: Engine> {
    browser: E::Browser,
    context: E::Context,
    page: E::Page,
    recorder: EventRecorder,
}

impl<E: Engine> BrowserSession<E> {
    pub fn page(&self) -> &E::Page {
        &self.page
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }
}

pub enum SessionState<E: Engine> {
    Stopped,
    Running(BrowserSession<E>),
}

/// Browser automation entry point. Owns the engine and at most one session.
pub struct Automation<E: Engine> {
    engine: E,
    options: LaunchOptions,
    timeouts: TimeoutConfig,
    state: SessionState<E>,
}

impl<E: Engine> Automation<E> {
    pub fn new(engine: E, options: LaunchOptions, timeouts: TimeoutConfig) -> Self {
        Self {
            engine,
            options,
            timeouts,
            state: SessionState::Stopped,
        }
    }

    /// Build from loaded settings; the session is not started yet
    pub fn from_config(engine: E, config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            engine,
            config.launch_options()?,
            config.timeouts.clone(),
        ))
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running(_))
    }

    /// The live session, if any
    pub fn session(&self) -> Option<&BrowserSession<E>> {
        match &self.state {
            SessionState::Running(session) => Some(session),
            SessionState::Stopped => None,
        }
    }

    /// Launch a browser, open an isolated context and page, and start
    /// recording its console and network events.
    pub async fn start(&mut self) -> Result<(), BrowserError> {
        if self.is_running() {
            return Err(BrowserError::PreconditionViolation { operation: "start" });
        }
        info!("Starting browser session");

        let browser = match self.engine.launch(&self.options).await {
            Ok(browser) => browser,
            Err(e) => {
                self.release(None, None, None).await;
                return Err(e);
            }
        };
        let context = match self.engine.new_context(&browser).await {
            Ok(context) => context,
            Err(e) => {
                self.release(None, None, Some(browser)).await;
                return Err(e);
            }
        };
        let page = match self.engine.new_page(&browser, &context).await {
            Ok(page) => page,
            Err(e) => {
                self.release(None, Some(context), Some(browser)).await;
                return Err(e);
            }
        };
        let streams = match page.subscribe().await {
            Ok(streams) => streams,
            Err(e) => {
                self.release(Some(page), Some(context), Some(browser)).await;
                return Err(e);
            }
        };

        let mut recorder = EventRecorder::new();
        recorder.attach(streams).await;

        self.state = SessionState::Running(BrowserSession {
            browser,
            context,
            page,
            recorder,
        });
        info!("Browser session started");
        Ok(())
    }

    /// Tear the session down. Never fails; each failing step is logged.
    pub async fn stop(&mut self) {
        match std::mem::replace(&mut self.state, SessionState::Stopped) {
            SessionState::Stopped => debug!("stop called with no running session"),
            SessionState::Running(session) => {
                let BrowserSession {
                    browser,
                    context,
                    page,
                    mut recorder,
                } = session;
                recorder.detach().await;
                self.release(Some(page), Some(context), Some(browser)).await;
                info!("Browser session stopped");
            }
        }
    }

    pub async fn restart(&mut self) -> Result<(), BrowserError> {
        info!("Restarting browser session");
        self.stop().await;
        self.start().await
    }

    /// Release in page → context → browser → engine order, continuing past failures
    async fn release(
        &mut self,
        page: Option<E::Page>,
        context: Option<E::Context>,
        browser: Option<E::Browser>,
    ) {
        if let Some(page) = page {
            if let Err(e) = self.engine.close_page(page).await {
                warn!("Failed to close page: {}", e);
            }
        }
        if let Some(browser) = &browser {
            if let Some(context) = context {
                if let Err(e) = self.engine.close_context(browser, context).await {
                    warn!("Failed to close browser context: {}", e);
                }
            }
        }
        if let Some(browser) = browser {
            if let Err(e) = self.engine.close_browser(browser).await {
                warn!("Failed to close browser: {}", e);
            }
        }
        if let Err(e) = self.engine.shutdown().await {
            warn!("Failed to shut down engine: {}", e);
        }
    }

    /// Honour the configured slow-motion delay
    async fn pace(&self) {
        if let Some(delay) = self.options.slow_mo {
            tokio::time::sleep(delay).await;
        }
    }

    fn running(&self, operation: &'static str) -> Result<&BrowserSession<E>, BrowserError> {
        self.session()
            .ok_or(BrowserError::PreconditionViolation { operation })
    }

    pub async fn navigate_to_url(&self, url: &str) -> Result<(), BrowserError> {
        let session = self.running("navigate_to_url")?;
        url::Url::parse(url).map_err(|e| {
            BrowserError::InvalidArgument(format!("'{}' is not an absolute URL: {}", url, e))
        })?;

        debug!("Navigating to {}", url);
        self.pace().await;
        deadline("navigate_to_url", self.timeouts.operation(), session.page.navigate(url))
            .await
            .map_err(|e| e.during("navigate_to_url", url))
    }

    /// Summarize the document body
    pub async fn explore_page_dom(
        &self,
        options: &SummaryOptions,
    ) -> Result<Option<ElementSnapshot>, BrowserError> {
        let session = self.running("explore_page_dom")?;
        let walk = async {
            match session.page.query_one("body").await? {
                Some(body) => summarizer::summarize(&body, 0, options).await,
                None => Ok(None),
            }
        };
        deadline("explore_page_dom", self.timeouts.operation(), walk)
            .await
            .map_err(|e| e.during("explore_page_dom", "body"))
    }

    /// Summarize the first element matching `selector`; `None` when nothing matches
    pub async fn explore_element_dom(
        &self,
        selector: &str,
        options: &SummaryOptions,
    ) -> Result<Option<ElementSnapshot>, BrowserError> {
        let session = self.running("explore_element_dom")?;
        let walk = async {
            match session.page.query_one(selector).await? {
                Some(node) => summarizer::summarize(&node, 0, options).await,
                None => Ok(None),
            }
        };
        deadline("explore_element_dom", self.timeouts.operation(), walk)
            .await
            .map_err(|e| e.during("explore_element_dom", selector))
    }

    pub async fn wait_for_element(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Option<Duration>,
    ) -> Result<bool, BrowserError> {
        let session = self.running("wait_for_element")?;
        let timeout = timeout.unwrap_or_else(|| self.timeouts.action());
        let result = deadline(
            "wait_for_element",
            timeout + ACTION_GRACE,
            session.page.wait_for(selector, state, timeout),
        )
        .await
        .map(|_| ());
        collapse("wait_for_element", selector, result)
    }

    /// Summarize every match, paging over matches before summarizing
    pub async fn find_elements(
        &self,
        selector: &str,
        options: &SummaryOptions,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ElementSnapshot>, BrowserError> {
        let session = self.running("find_elements")?;
        let walk = async {
            let nodes = session.page.query_all(selector).await?;
            debug!("{} matches for '{}'", nodes.len(), selector);

            let mut out = Vec::new();
            for node in nodes.iter().skip(offset).take(limit) {
                if let Some(summary) = summarizer::summarize(node, 0, options).await? {
                    out.push(summary);
                }
            }
            Ok::<_, BrowserError>(out)
        };
        deadline("find_elements", self.timeouts.operation(), walk)
            .await
            .map_err(|e| e.during("find_elements", selector))
    }

    pub async fn click_on_element(
        &self,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<bool, BrowserError> {
        let session = self.running("click_on_element")?;
        let timeout = timeout.unwrap_or_else(|| self.timeouts.action());
        self.pace().await;
        let result = deadline(
            "click_on_element",
            timeout + ACTION_GRACE,
            session.page.click(selector, timeout),
        )
        .await;
        collapse("click_on_element", selector, result)
    }

    /// Raw text content of the first visible match; empty when none appears in time
    pub async fn get_element_text_content(
        &self,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<String, BrowserError> {
        let session = self.running("get_element_text_content")?;
        let timeout = timeout.unwrap_or_else(|| self.timeouts.action());
        let read = async {
            match session.page.wait_for(selector, WaitState::Visible, timeout).await? {
                Some(node) => node.text_content().await,
                None => Ok(String::new()),
            }
        };

        match deadline("get_element_text_content", timeout + ACTION_GRACE, read).await {
            Ok(text) => Ok(text),
            Err(e) if e.is_not_found() || e.is_timeout() => {
                debug!("No text for '{}': {}", selector, e);
                Ok(String::new())
            }
            Err(e) => Err(e.during("get_element_text_content", selector)),
        }
    }

    pub async fn fill_input(
        &self,
        selector: &str,
        value: &str,
        timeout: Option<Duration>,
    ) -> Result<bool, BrowserError> {
        let session = self.running("fill_input")?;
        let timeout = timeout.unwrap_or_else(|| self.timeouts.action());
        self.pace().await;
        let result = deadline(
            "fill_input",
            timeout + ACTION_GRACE,
            session.page.fill(selector, value, timeout),
        )
        .await;
        collapse("fill_input", selector, result)
    }

    pub async fn reload_page(&self) -> Result<(), BrowserError> {
        let session = self.running("reload_page")?;
        self.pace().await;
        deadline("reload_page", self.timeouts.operation(), session.page.reload())
            .await
            .map_err(|e| e.during("reload_page", ""))
    }

    /// Run a function body in the page with `arg` bound, returning its JSON result
    pub async fn execute_js(&self, script: &str, arg: Value) -> Result<Value, BrowserError> {
        let session = self.running("execute_js")?;
        let wrapped = wrap_function_body(script);
        self.pace().await;
        deadline(
            "execute_js",
            self.timeouts.operation(),
            session.page.execute_script(&wrapped, arg),
        )
        .await
        .map_err(|e| e.during("execute_js", script))
    }

    pub async fn get_console_logs(
        &self,
        q: &EventQuery,
    ) -> Result<Vec<ConsoleLogEntry>, BrowserError> {
        let session = self.running("get_console_logs")?;
        Ok(session.recorder.console_logs(q).await)
    }

    pub async fn get_network_requests(
        &self,
        q: &EventQuery,
        resource_type: Option<ResourceType>,
    ) -> Result<Vec<NetworkRequestEntry>, BrowserError> {
        let session = self.running("get_network_requests")?;
        Ok(session.recorder.network_requests(q, resource_type).await)
    }

    /// Press `Key` or `Modifier+Key`
    pub async fn press_key(&self, key: &str) -> Result<bool, BrowserError> {
        let session = self.running("press_key")?;
        let result = match KeyPress::parse(key) {
            Ok(press) => {
                self.pace().await;
                deadline(
                    "press_key",
                    self.timeouts.action(),
                    session.page.press_key(&press),
                )
                .await
            }
            Err(e) => Err(e),
        };
        collapse("press_key", key, result)
    }
}

async fn deadline<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, BrowserError>
where
    F: Future<Output = Result<T, BrowserError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::timeout(operation, limit)),
    }
}

/// Page-level failures become `false`; a dead session still errors.
fn collapse(
    operation: &'static str,
    target: &str,
    result: Result<(), BrowserError>,
) -> Result<bool, BrowserError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_fatal() => Err(e.during(operation, target)),
        Err(e) => {
            debug!("{} on '{}' returned false: {}", operation, target, e);
            Ok(false)
        }
    }
}
