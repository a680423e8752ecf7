//! # pagetap
#![allow(clippy::uninlined_format_args)]
//!
//! Browser automation tools for LLM agents: bounded DOM summaries with
//! synthesized selectors, and queryable console/network capture.
//!
//! ## Primary Use Case
//!
//! An agent drives one long-lived browser session through a small set of
//! tools. Pages are described as compact element trees instead of raw HTML,
//! and everything the page logs or fetches is recorded for later queries.
//!
//! ## CLI Usage
//!
//! ```bash
//! # Start the daemon (Chrome over CDP by default)
//! pagetap daemon start
//!
//! # Or use Firefox through geckodriver
//! pagetap --engine firefox daemon start
//!
//! # Navigate and summarize the page
//! pagetap navigate "https://example.com"
//! pagetap explore --max-depth 3 --max-children 5
//!
//! # Summarize matches, paging over them
//! pagetap find ".result" --limit 10 --offset 10
//!
//! # Interact
//! pagetap fill "input[name='q']" "rust"
//! pagetap press Enter
//! pagetap click "button.submit"
//! pagetap wait "#spinner" --state hidden
//!
//! # Read back what the page did
//! pagetap console --limit 20
//! pagetap network --resource-type xhr
//!
//! # Run a function body with an argument
//! pagetap eval "return document.querySelectorAll(arg).length" --arg '"a"'
//!
//! # Stop the daemon
//! pagetap daemon stop
//! ```
//!
//! `pagetap serve` speaks the same tool protocol over stdin/stdout for
//! hosts that spawn the tool directly.
//!
//! ## Library Usage
//!
//! ```no_run
//! use pagetap::{Automation, CdpEngine, LaunchOptions, SummaryOptions, TimeoutConfig};
//!
//! # async fn example() -> Result<(), pagetap::BrowserError> {
//! let mut automation = Automation::new(
//!     CdpEngine::new(),
//!     LaunchOptions::default(),
//!     TimeoutConfig::default(),
//! );
//! automation.start().await?;
//! automation.navigate_to_url("https://example.com").await?;
//! let tree = automation.explore_page_dom(&SummaryOptions::default()).await?;
//! automation.stop().await;
//! # Ok(())
//! # }
//! ```

/// Browser session lifecycle and the tool operations
pub mod automation;

/// Chrome DevTools Protocol engine
pub mod cdp;

/// CLI command handlers
pub mod commands;

/// Config file and command line overrides
pub mod config;

/// Local socket daemon holding the session between CLI calls
pub mod daemon;

/// Capability traits implemented by every engine
pub mod driver;

pub mod errors;

/// Tool request/response vocabulary
pub mod protocol;

/// Time-window and paging queries over recorded events
pub mod query;

pub mod recorder;

/// Unique CSS selectors for DOM nodes
pub mod selector;

/// Bounded DOM snapshots
pub mod summarizer;

/// Type definitions shared across the crate
pub mod types;

/// WebDriver engine (geckodriver/chromedriver)
pub mod webdriver;

/// Automatic WebDriver process management
pub mod webdriver_manager;

pub use automation::Automation;
pub use cdp::CdpEngine;
pub use config::{Config, EngineKind, TimeoutConfig};
pub use driver::{DomNode, Engine, LaunchOptions, PageDriver};
pub use errors::BrowserError;
pub use query::EventQuery;
pub use summarizer::SummaryOptions;
pub use types::{
    ConsoleLevel, ConsoleLogEntry, ElementSnapshot, NetworkRequestEntry, OutputFormat,
    ResourceType, ViewportSize, WaitState,
};
pub use webdriver::{BrowserType, WebDriverEngine};
