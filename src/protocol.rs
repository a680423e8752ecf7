//! Request/response vocabulary shared by the daemon socket and `serve`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::automation::Automation;
use crate::driver::Engine;
use crate::errors::BrowserError;
use crate::query::{DEFAULT_LIMIT, EventQuery};
use crate::summarizer::SummaryOptions;
use crate::types::{
    ConsoleLogEntry, ElementSnapshot, NetworkRequestEntry, ResourceType, WaitState,
};

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// One tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRequest {
    Navigate {
        url: String,
    },
    ExplorePage {
        #[serde(flatten)]
        options: SummaryOptions,
    },
    ExploreElement {
        selector: String,
        #[serde(flatten)]
        options: SummaryOptions,
    },
    WaitForElement {
        selector: String,
        #[serde(default)]
        state: WaitState,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    FindElements {
        selector: String,
        #[serde(flatten)]
        options: SummaryOptions,
        #[serde(default = "default_limit")]
        limit: usize,
        #[serde(default)]
        offset: usize,
    },
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    TextContent {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Fill {
        selector: String,
        value: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Reload,
    ExecuteJs {
        script: String,
        #[serde(default)]
        arg: Value,
    },
    ConsoleLogs {
        #[serde(flatten)]
        query: EventQuery,
    },
    NetworkRequests {
        #[serde(flatten)]
        query: EventQuery,
        #[serde(default)]
        resource_type: Option<ResourceType>,
    },
    PressKey {
        key: String,
    },

    // Session control
    Start,
    Stop,
    Restart,
    Ping,
    Shutdown,
}

impl ToolRequest {
    /// Short name for logs; scripts and values stay out of them
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::Navigate { .. } => "navigate",
            ToolRequest::ExplorePage { .. } => "explore_page",
            ToolRequest::ExploreElement { .. } => "explore_element",
            ToolRequest::WaitForElement { .. } => "wait_for_element",
            ToolRequest::FindElements { .. } => "find_elements",
            ToolRequest::Click { .. } => "click",
            ToolRequest::TextContent { .. } => "text_content",
            ToolRequest::Fill { .. } => "fill",
            ToolRequest::Reload => "reload",
            ToolRequest::ExecuteJs { .. } => "execute_js",
            ToolRequest::ConsoleLogs { .. } => "console_logs",
            ToolRequest::NetworkRequests { .. } => "network_requests",
            ToolRequest::PressKey { .. } => "press_key",
            ToolRequest::Start => "start",
            ToolRequest::Stop => "stop",
            ToolRequest::Restart => "restart",
            ToolRequest::Ping => "ping",
            ToolRequest::Shutdown => "shutdown",
        }
    }
}

/// Result of one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResponse {
    Success(String),
    Bool(bool),
    Text(String),
    Snapshot(Option<ElementSnapshot>),
    Snapshots(Vec<ElementSnapshot>),
    Value(Value),
    ConsoleLogs(Vec<ConsoleLogEntry>),
    NetworkRequests(Vec<NetworkRequestEntry>),
    Error { message: String, exit_code: i32 },
    Pong,
}

impl ToolResponse {
    pub fn error(message: impl Into<String>, exit_code: i32) -> Self {
        ToolResponse::Error {
            message: message.into(),
            exit_code,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResponse::Error { .. })
    }
}

impl From<BrowserError> for ToolResponse {
    fn from(err: BrowserError) -> Self {
        ToolResponse::error(err.to_string(), err.exit_code())
    }
}

fn respond<T>(result: Result<T, BrowserError>, wrap: impl FnOnce(T) -> ToolResponse) -> ToolResponse {
    match result {
        Ok(value) => wrap(value),
        Err(e) => {
            debug!("Tool call failed: {}", e);
            e.into()
        }
    }
}

/// Run one request against the automation core.
pub async fn dispatch<E: Engine>(automation: &mut Automation<E>, request: ToolRequest) -> ToolResponse {
    let timeout = |ms: Option<u64>| ms.map(Duration::from_millis);

    match request {
        ToolRequest::Navigate { url } => respond(automation.navigate_to_url(&url).await, |_| {
            ToolResponse::Success(format!("Navigated to {}", url))
        }),
        ToolRequest::ExplorePage { options } => respond(
            automation.explore_page_dom(&options).await,
            ToolResponse::Snapshot,
        ),
        ToolRequest::ExploreElement { selector, options } => respond(
            automation.explore_element_dom(&selector, &options).await,
            ToolResponse::Snapshot,
        ),
        ToolRequest::WaitForElement {
            selector,
            state,
            timeout_ms,
        } => respond(
            automation
                .wait_for_element(&selector, state, timeout(timeout_ms))
                .await,
            ToolResponse::Bool,
        ),
        ToolRequest::FindElements {
            selector,
            options,
            limit,
            offset,
        } => respond(
            automation
                .find_elements(&selector, &options, limit, offset)
                .await,
            ToolResponse::Snapshots,
        ),
        ToolRequest::Click {
            selector,
            timeout_ms,
        } => respond(
            automation
                .click_on_element(&selector, timeout(timeout_ms))
                .await,
            ToolResponse::Bool,
        ),
        ToolRequest::TextContent {
            selector,
            timeout_ms,
        } => respond(
            automation
                .get_element_text_content(&selector, timeout(timeout_ms))
                .await,
            ToolResponse::Text,
        ),
        ToolRequest::Fill {
            selector,
            value,
            timeout_ms,
        } => respond(
            automation
                .fill_input(&selector, &value, timeout(timeout_ms))
                .await,
            ToolResponse::Bool,
        ),
        ToolRequest::Reload => respond(automation.reload_page().await, |_| {
            ToolResponse::Success("Page reloaded".to_string())
        }),
        ToolRequest::ExecuteJs { script, arg } => respond(
            automation.execute_js(&script, arg).await,
            ToolResponse::Value,
        ),
        ToolRequest::ConsoleLogs { query } => respond(
            automation.get_console_logs(&query).await,
            ToolResponse::ConsoleLogs,
        ),
        ToolRequest::NetworkRequests {
            query,
            resource_type,
        } => respond(
            automation.get_network_requests(&query, resource_type).await,
            ToolResponse::NetworkRequests,
        ),
        ToolRequest::PressKey { key } => {
            respond(automation.press_key(&key).await, ToolResponse::Bool)
        }
        ToolRequest::Start => respond(automation.start().await, |_| {
            ToolResponse::Success("Browser session started".to_string())
        }),
        ToolRequest::Stop | ToolRequest::Shutdown => {
            automation.stop().await;
            ToolResponse::Success("Browser session stopped".to_string())
        }
        ToolRequest::Restart => respond(automation.restart().await, |_| {
            ToolResponse::Success("Browser session restarted".to_string())
        }),
        ToolRequest::Ping => ToolResponse::Pong,
    }
}

/// Parse one protocol line and dispatch it. Unparseable input is answered
/// with an error instead of tearing down the session.
pub async fn handle_line<E: Engine>(automation: &mut Automation<E>, line: &str) -> ToolResponse {
    match serde_json::from_str::<ToolRequest>(line) {
        Ok(request) => {
            info!("Received request: {}", request.name());
            dispatch(automation, request).await
        }
        Err(e) => ToolResponse::error(format!("Invalid request: {}", e), 1),
    }
}

/// Answer newline-delimited requests from stdin on stdout until EOF or
/// `shutdown`. Starts the session first.
pub async fn serve<E: Engine>(mut automation: Automation<E>) -> Result<()> {
    automation.start().await?;
    info!("Serving tool requests on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let shutdown = matches!(
            serde_json::from_str::<ToolRequest>(&line),
            Ok(ToolRequest::Shutdown)
        );

        let response = handle_line(&mut automation, &line).await;
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;

        if shutdown {
            break;
        }
    }

    automation.stop().await;
    Ok(())
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod protocol_test;
