use std::time::Duration;

use thiserror::Error;

/// Errors raised by the automation core and the engines behind it
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Operation invoked while no session is running (exit code 6)
    #[error("{operation} requires a running browser session")]
    PreconditionViolation { operation: &'static str },

    /// Selector matched nothing (exit code 2)
    #[error("No elements found matching selector: {selector}")]
    ElementNotFound { selector: String },

    /// Engine call exceeded its deadline (exit code 5)
    #[error("Operation timed out: {operation} after {}ms", .timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Node vanished while it was being read
    #[error("Element is no longer attached to the document")]
    StaleElement,

    /// Page script threw or returned something that cannot be serialized
    #[error("Script execution failed: {message}")]
    ScriptExecution { script: String, message: String },

    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Browser or driver could not be started (exit code 4)
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// Connection to the browser is gone (exit code 4)
    #[error("Browser session closed: {0}")]
    SessionClosed(String),

    /// Any other engine failure (exit code 4)
    #[error("{operation} failed: {message}")]
    Driver { operation: String, message: String },

    /// Failure relayed from the daemon, keeping its exit code
    #[error("{message}")]
    Reported { message: String, exit_code: i32 },

    /// Failure tagged with the operation and the selector or script it targeted
    #[error("{operation} failed for '{target}': {source}")]
    Operation {
        operation: &'static str,
        target: String,
        #[source]
        source: Box<BrowserError>,
    },
}

impl BrowserError {
    pub fn driver(operation: impl Into<String>, message: impl ToString) -> Self {
        BrowserError::Driver {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(selector: impl Into<String>) -> Self {
        BrowserError::ElementNotFound {
            selector: selector.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        BrowserError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Attach the failing operation and its selector/script, unless the error
    /// already says everything the caller needs.
    pub fn during(self, operation: &'static str, target: &str) -> Self {
        match self {
            BrowserError::PreconditionViolation { .. } | BrowserError::Operation { .. } => self,
            other => BrowserError::Operation {
                operation,
                target: preview(target),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through `Operation` wrappers
    pub fn root(&self) -> &BrowserError {
        match self {
            BrowserError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.root(), BrowserError::StaleElement)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), BrowserError::ElementNotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), BrowserError::Timeout { .. })
    }

    /// Errors that mean the session itself is unusable, as opposed to a
    /// page-level miss the caller may retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root(),
            BrowserError::PreconditionViolation { .. } | BrowserError::SessionClosed(_)
        )
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            BrowserError::ElementNotFound { .. } => 2,
            BrowserError::Launch(_)
            | BrowserError::SessionClosed(_)
            | BrowserError::Driver { .. } => 4,
            BrowserError::Timeout { .. } => 5,
            BrowserError::PreconditionViolation { .. } => 6,
            BrowserError::Reported { exit_code, .. } => *exit_code,
            _ => 1,
        }
    }
}

/// Classify an engine error message the way the drivers phrase them.
pub fn classify_message(operation: &str, selector: Option<&str>, message: String) -> BrowserError {
    let lower = message.to_lowercase();

    if lower.contains("stale element")
        || lower.contains("detached")
        || lower.contains("no node with given id")
        || lower.contains("could not find node with given id")
        || lower.contains("could not find object with given id")
    {
        BrowserError::StaleElement
    } else if lower.contains("no such element") || lower.contains("unable to locate element") {
        BrowserError::not_found(selector.unwrap_or_default())
    } else if lower.contains("timeout") || lower.contains("timed out") {
        BrowserError::Timeout {
            operation: operation.to_string(),
            timeout: Duration::ZERO,
        }
    } else if lower.contains("invalid session id")
        || lower.contains("session deleted")
        || lower.contains("channel closed")
        || lower.contains("connection closed")
    {
        BrowserError::SessionClosed(message)
    } else {
        BrowserError::Driver {
            operation: operation.to_string(),
            message,
        }
    }
}

/// Shorten long scripts so error messages stay readable
fn preview(target: &str) -> String {
    const LIMIT: usize = 120;
    if target.chars().count() > LIMIT {
        let head: String = target.chars().take(LIMIT).collect();
        format!("{}...", head)
    } else {
        target.to_string()
    }
}

#[cfg(test)]
#[path = "errors_test.rs"]
mod errors_test;
