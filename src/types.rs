use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::BrowserError;

/// Output format for CLI results
#[derive(Clone, Copy, Debug, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format for programmatic consumption
    Json,
    /// Human-readable simple format
    Simple,
}

/// Bounded, serializable view of a live DOM subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    /// Lower-case tag name
    pub tag: String,
    /// Trimmed rendered text, at most 80 characters
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    /// Verbatim class attribute
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class: Option<String>,
    /// `type` attribute (inputs, buttons)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub r#type: Option<String>,
    /// CSS path that resolved to this node when the snapshot was taken
    pub selector: String,
    pub children: Vec<ElementSnapshot>,
}

impl ElementSnapshot {
    /// Depth of the deepest descendant, the node itself being 0
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|child| child.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Total number of nodes in the snapshot
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }
}

/// Console message kinds, named as the DevTools protocol names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Error,
    Warning,
    Dir,
    Dirxml,
    Table,
    Trace,
    Clear,
    StartGroup,
    StartGroupCollapsed,
    EndGroup,
    Assert,
    Profile,
    ProfileEnd,
    Count,
    TimeEnd,
    Other,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Error => "error",
            ConsoleLevel::Warning => "warning",
            ConsoleLevel::Dir => "dir",
            ConsoleLevel::Dirxml => "dirxml",
            ConsoleLevel::Table => "table",
            ConsoleLevel::Trace => "trace",
            ConsoleLevel::Clear => "clear",
            ConsoleLevel::StartGroup => "startGroup",
            ConsoleLevel::StartGroupCollapsed => "startGroupCollapsed",
            ConsoleLevel::EndGroup => "endGroup",
            ConsoleLevel::Assert => "assert",
            ConsoleLevel::Profile => "profile",
            ConsoleLevel::ProfileEnd => "profileEnd",
            ConsoleLevel::Count => "count",
            ConsoleLevel::TimeEnd => "timeEnd",
            ConsoleLevel::Other => "other",
        }
    }

    /// Map an engine's name for a console call. Unknown names become `Other`;
    /// `warn` (the JS method name) is accepted for `warning`.
    pub fn from_engine(name: &str) -> Self {
        match name {
            "log" => ConsoleLevel::Log,
            "debug" => ConsoleLevel::Debug,
            "info" => ConsoleLevel::Info,
            "error" => ConsoleLevel::Error,
            "warn" | "warning" => ConsoleLevel::Warning,
            "dir" => ConsoleLevel::Dir,
            "dirxml" => ConsoleLevel::Dirxml,
            "table" => ConsoleLevel::Table,
            "trace" => ConsoleLevel::Trace,
            "clear" => ConsoleLevel::Clear,
            "startGroup" | "group" => ConsoleLevel::StartGroup,
            "startGroupCollapsed" | "groupCollapsed" => ConsoleLevel::StartGroupCollapsed,
            "endGroup" | "groupEnd" => ConsoleLevel::EndGroup,
            "assert" => ConsoleLevel::Assert,
            "profile" => ConsoleLevel::Profile,
            "profileEnd" => ConsoleLevel::ProfileEnd,
            "count" => ConsoleLevel::Count,
            "timeEnd" => ConsoleLevel::TimeEnd,
            _ => ConsoleLevel::Other,
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source position of a console call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLocation {
    pub url: String,
    pub line_number: u32,
    pub column_number: u32,
}

/// One observed console message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLogEntry {
    #[serde(rename = "type")]
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<ConsoleLocation>,
}

/// Engine classification of a fetched resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Texttrack,
    Xhr,
    Fetch,
    Websocket,
    Manifest,
    Other,
}

impl ResourceType {
    pub const ALL: [ResourceType; 12] = [
        ResourceType::Document,
        ResourceType::Stylesheet,
        ResourceType::Image,
        ResourceType::Media,
        ResourceType::Font,
        ResourceType::Script,
        ResourceType::Texttrack,
        ResourceType::Xhr,
        ResourceType::Fetch,
        ResourceType::Websocket,
        ResourceType::Manifest,
        ResourceType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Document => "document",
            ResourceType::Stylesheet => "stylesheet",
            ResourceType::Image => "image",
            ResourceType::Media => "media",
            ResourceType::Font => "font",
            ResourceType::Script => "script",
            ResourceType::Texttrack => "texttrack",
            ResourceType::Xhr => "xhr",
            ResourceType::Fetch => "fetch",
            ResourceType::Websocket => "websocket",
            ResourceType::Manifest => "manifest",
            ResourceType::Other => "other",
        }
    }

    /// Map whatever the engine reports. Anything outside the vocabulary
    /// (prefetch, ping, eventsource, ...) is `Other`.
    pub fn from_engine(name: &str) -> Self {
        name.parse().unwrap_or(ResourceType::Other)
    }
}

impl FromStr for ResourceType {
    type Err = BrowserError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| {
                BrowserError::InvalidArgument(format!(
                    "unknown resource type '{}', expected one of: {}",
                    s,
                    ResourceType::ALL.map(|t| t.as_str()).join(", ")
                ))
            })
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing request observed on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequestEntry {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub resource_type: ResourceType,
}

/// Element state awaited by `wait_for_element`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WaitState {
    /// Present and rendered
    #[default]
    Visible,
    /// Absent or not rendered
    Hidden,
    /// Present in the DOM
    Attached,
    /// Absent from the DOM
    Detached,
}

impl WaitState {
    /// Whether a node with the given presence/visibility satisfies the state
    pub fn is_satisfied(&self, present: bool, visible: bool) -> bool {
        match self {
            WaitState::Visible => present && visible,
            WaitState::Hidden => !present || !visible,
            WaitState::Attached => present,
            WaitState::Detached => !present,
        }
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// Keyboard modifier held while a key is pressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    Alt,
    Control,
    Meta,
    Shift,
}

impl Modifier {
    /// Bit used by the DevTools `Input.dispatchKeyEvent` modifiers mask
    pub fn cdp_bit(&self) -> i64 {
        match self {
            Modifier::Alt => 1,
            Modifier::Control => 2,
            Modifier::Meta => 4,
            Modifier::Shift => 8,
        }
    }
}

impl FromStr for Modifier {
    type Err = BrowserError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alt" | "option" => Ok(Modifier::Alt),
            "control" | "ctrl" => Ok(Modifier::Control),
            "meta" | "cmd" | "command" => Ok(Modifier::Meta),
            "shift" => Ok(Modifier::Shift),
            _ => Err(BrowserError::InvalidArgument(format!(
                "unknown modifier '{}'",
                s
            ))),
        }
    }
}

/// A key press, optionally chorded with one modifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    pub modifier: Option<Modifier>,
    pub key: String,
}

impl KeyPress {
    /// Parse `Key` or `Modifier+Key`. The string is split on the first `+`;
    /// a lone `+` or a trailing `+` names the plus key itself.
    pub fn parse(input: &str) -> std::result::Result<Self, BrowserError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BrowserError::InvalidArgument("empty key".into()));
        }
        if input == "+" {
            return Ok(KeyPress {
                modifier: None,
                key: "+".into(),
            });
        }

        match input.split_once('+') {
            Some((modifier, key)) => {
                let key = if key.is_empty() { "+" } else { key };
                Ok(KeyPress {
                    modifier: Some(modifier.trim().parse()?),
                    key: key.to_string(),
                })
            }
            None => Ok(KeyPress {
                modifier: None,
                key: input.to_string(),
            }),
        }
    }
}

impl fmt::Display for KeyPress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modifier {
            Some(m) => write!(f, "{:?}+{}", m, self.key),
            None => f.write_str(&self.key),
        }
    }
}

/// Browser viewport dimensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    /// Viewport width in pixels
    pub width: u32,
    /// Viewport height in pixels
    pub height: u32,
}

impl ViewportSize {
    /// Parse viewport size from "WIDTHxHEIGHT" format (e.g., "1920x1080")
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('x').collect();
        if parts.len() != 2 {
            anyhow::bail!("Invalid viewport format. Use WIDTHxHEIGHT (e.g., 1920x1080)");
        }

        let width = parts[0]
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid width in viewport size"))?;
        let height = parts[1]
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid height in viewport size"))?;

        Ok(ViewportSize { width, height })
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
