use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde_json::Value;
use tracing::debug;

use crate::daemon::DaemonClient;
use crate::errors::BrowserError;
use crate::protocol::{ToolRequest, ToolResponse};
use crate::query::EventQuery;
use crate::summarizer::SummaryOptions;
use crate::types::{OutputFormat, ResourceType, WaitState};

use super::output;
use super::utils::require_daemon;

#[derive(Args, Debug, Clone)]
pub struct SummaryArgs {
    /// Deepest level of descendants to include
    #[arg(long, default_value_t = 10)]
    pub max_depth: usize,

    /// Children kept per element
    #[arg(long, default_value_t = 10)]
    pub max_children: usize,

    /// Include elements that are not rendered
    #[arg(long)]
    pub include_hidden: bool,
}

impl From<SummaryArgs> for SummaryOptions {
    fn from(args: SummaryArgs) -> Self {
        SummaryOptions {
            max_depth: args.max_depth,
            max_children: args.max_children,
            visible_only: !args.include_hidden,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Maximum entries to return
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Entries to skip, newest first
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Only entries at or after this RFC 3339 time
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Only entries at or before this RFC 3339 time
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,
}

impl From<QueryArgs> for EventQuery {
    fn from(args: QueryArgs) -> Self {
        EventQuery {
            limit: args.limit,
            offset: args.offset,
            time_from: args.from,
            time_to: args.to,
        }
    }
}

/// Operations forwarded to the daemon's browser session
#[derive(Subcommand, Debug, Clone)]
pub enum ToolCommands {
    /// Navigate the page to a URL
    Navigate {
        /// Absolute URL
        url: String,
    },

    /// Summarize the page body
    Explore {
        #[command(flatten)]
        summary: SummaryArgs,
    },

    /// Summarize the first element matching a selector
    ExploreElement {
        /// CSS selector for the element
        selector: String,

        #[command(flatten)]
        summary: SummaryArgs,
    },

    /// Wait for an element to reach a state
    Wait {
        /// CSS selector for the element
        selector: String,

        /// State to wait for
        #[arg(long, default_value = "visible")]
        state: WaitState,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Summarize every element matching a selector
    Find {
        /// CSS selector for the elements
        selector: String,

        #[command(flatten)]
        summary: SummaryArgs,

        /// Maximum matches to summarize
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Matches to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Click an element
    Click {
        /// CSS selector for the element
        selector: String,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print the text content of an element
    Text {
        /// CSS selector for the element
        selector: String,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Replace the value of an input
    Fill {
        /// CSS selector for the input element
        selector: String,

        /// Value to fill in
        value: String,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Reload the current page
    Reload,

    /// Execute a JavaScript function body (`arg` holds the argument)
    Eval {
        /// Function body, e.g. "return document.title"
        script: String,

        /// JSON argument bound to `arg`
        #[arg(long)]
        arg: Option<String>,
    },

    /// Show captured console messages, newest first
    Console {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show captured network requests, newest first
    Network {
        #[command(flatten)]
        query: QueryArgs,

        /// Only requests of this resource type (document, xhr, fetch, ...)
        #[arg(long)]
        resource_type: Option<ResourceType>,
    },

    /// Press a key or Modifier+Key chord
    Press {
        /// e.g. Enter, Control+a
        key: String,
    },

    /// Restart the browser session with empty buffers
    Restart,
}

impl ToolCommands {
    pub fn into_request(self) -> Result<ToolRequest> {
        Ok(match self {
            ToolCommands::Navigate { url } => ToolRequest::Navigate { url },
            ToolCommands::Explore { summary } => ToolRequest::ExplorePage {
                options: summary.into(),
            },
            ToolCommands::ExploreElement { selector, summary } => ToolRequest::ExploreElement {
                selector,
                options: summary.into(),
            },
            ToolCommands::Wait {
                selector,
                state,
                timeout_ms,
            } => ToolRequest::WaitForElement {
                selector,
                state,
                timeout_ms,
            },
            ToolCommands::Find {
                selector,
                summary,
                limit,
                offset,
            } => ToolRequest::FindElements {
                selector,
                options: summary.into(),
                limit,
                offset,
            },
            ToolCommands::Click {
                selector,
                timeout_ms,
            } => ToolRequest::Click {
                selector,
                timeout_ms,
            },
            ToolCommands::Text {
                selector,
                timeout_ms,
            } => ToolRequest::TextContent {
                selector,
                timeout_ms,
            },
            ToolCommands::Fill {
                selector,
                value,
                timeout_ms,
            } => ToolRequest::Fill {
                selector,
                value,
                timeout_ms,
            },
            ToolCommands::Reload => ToolRequest::Reload,
            ToolCommands::Eval { script, arg } => {
                let arg = match arg {
                    Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                        BrowserError::InvalidArgument(format!("--arg is not valid JSON: {}", e))
                    })?,
                    None => Value::Null,
                };
                ToolRequest::ExecuteJs { script, arg }
            }
            ToolCommands::Console { query } => ToolRequest::ConsoleLogs {
                query: query.into(),
            },
            ToolCommands::Network {
                query,
                resource_type,
            } => ToolRequest::NetworkRequests {
                query: query.into(),
                resource_type,
            },
            ToolCommands::Press { key } => ToolRequest::PressKey { key },
            ToolCommands::Restart => ToolRequest::Restart,
        })
    }
}

/// Send one operation to the daemon and print its result
pub fn handle_tool(command: ToolCommands, format: OutputFormat) -> Result<()> {
    require_daemon()?;

    let request = command.into_request()?;
    debug!("Sending {} to daemon", request.name());
    let response = DaemonClient::send_request(request)?;
    print_response(response, format)
}

pub fn print_response(response: ToolResponse, format: OutputFormat) -> Result<()> {
    if let ToolResponse::Error { message, exit_code } = response {
        return Err(BrowserError::Reported { message, exit_code }.into());
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output::to_json(&response)?)?)
        }
        OutputFormat::Simple => println!("{}", output::to_simple(&response)),
    }
    Ok(())
}
