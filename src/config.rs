use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::LaunchOptions;
use crate::types::ViewportSize;

/// Which backend drives the browser
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Chrome/Chromium over the DevTools protocol
    #[default]
    Chrome,
    /// Firefox over WebDriver (geckodriver)
    Firefox,
    /// Chrome over WebDriver (chromedriver)
    Chromedriver,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Chrome => write!(f, "chrome"),
            EngineKind::Firefox => write!(f, "firefox"),
            EngineKind::Chromedriver => write!(f, "chromedriver"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub timeouts: TimeoutConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub engine: EngineKind,
    pub headless: bool,
    /// WIDTHxHEIGHT
    pub viewport: Option<String>,
    /// Chrome binary, CDP engine only
    pub executable: Option<PathBuf>,
    /// Externally managed WebDriver server. When unset a driver is started.
    pub webdriver_url: Option<String>,
    /// Delay before each page interaction, for watching a headed browser
    pub slow_mo_ms: Option<u64>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            headless: true,
            viewport: None,
            executable: None,
            webdriver_url: None,
            slow_mo_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// click / fill / wait / text
    pub action_ms: u64,
    /// navigate / reload / script / summarize
    pub operation_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            action_ms: 30_000,
            operation_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
        }
    }
}

impl Config {
    /// ~/.config/pagetap/config.toml (or the platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pagetap").join("config.toml"))
    }

    /// Load from an explicit path, else the default location if it exists,
    /// else built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(viewport) = &self.browser.viewport {
            ViewportSize::parse(viewport)?;
        }
        if self.timeouts.action_ms == 0 || self.timeouts.operation_ms == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        if self.capture.poll_interval_ms == 0 {
            anyhow::bail!("capture.poll_interval_ms must be greater than zero");
        }
        if let Some(url) = &self.browser.webdriver_url {
            url::Url::parse(url).with_context(|| format!("Invalid webdriver_url '{}'", url))?;
        }
        Ok(())
    }

    pub fn viewport(&self) -> Result<Option<ViewportSize>> {
        self.browser
            .viewport
            .as_deref()
            .map(ViewportSize::parse)
            .transpose()
    }

    pub fn launch_options(&self) -> Result<LaunchOptions> {
        Ok(LaunchOptions {
            headless: self.browser.headless,
            viewport: self.viewport()?,
            executable: self.browser.executable.clone(),
            slow_mo: self
                .browser
                .slow_mo_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        })
    }
}

/// Command line settings layered over the config file
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    /// Config file (defaults to ~/.config/pagetap/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Browser engine
    #[arg(long, global = true)]
    pub engine: Option<EngineKind>,

    /// Set viewport size (WIDTHxHEIGHT, e.g., 1920x1080)
    #[arg(long, global = true)]
    pub viewport: Option<String>,

    /// Run browser in visible mode (disables headless)
    #[arg(long = "no-headless", global = true)]
    pub no_headless: bool,

    /// WebDriver server to use instead of starting one
    #[arg(long, global = true)]
    pub webdriver_url: Option<String>,
}

impl ConfigOverrides {
    /// Load the config file and apply these overrides on top
    pub fn load(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(engine) = self.engine {
            config.browser.engine = engine;
        }
        if let Some(viewport) = &self.viewport {
            config.browser.viewport = Some(viewport.clone());
        }
        if self.no_headless {
            config.browser.headless = false;
        }
        if let Some(url) = &self.webdriver_url {
            config.browser.webdriver_url = Some(url.clone());
        }
    }

    /// The same overrides as command line arguments, for re-exec
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.config {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        if let Some(engine) = self.engine {
            args.push("--engine".to_string());
            args.push(engine.to_string());
        }
        if let Some(viewport) = &self.viewport {
            args.push("--viewport".to_string());
            args.push(viewport.clone());
        }
        if self.no_headless {
            args.push("--no-headless".to_string());
        }
        if let Some(url) = &self.webdriver_url {
            args.push("--webdriver-url".to_string());
            args.push(url.clone());
        }
        args
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
