use anyhow::Result;

use crate::automation::Automation;
use crate::cdp::CdpEngine;
use crate::config::{Config, EngineKind};
use crate::daemon::DaemonClient;
use crate::webdriver::{BrowserType, WebDriverEngine};

/// Check if daemon is running and return error if not
pub fn require_daemon() -> Result<()> {
    if !DaemonClient::is_daemon_running() {
        eprintln!("Error: The daemon is not running.");
        eprintln!("Start the daemon with: pagetap daemon start");
        return Err(anyhow::anyhow!("Daemon not running"));
    }
    Ok(())
}

/// An automation core wired to whichever engine the config selects
pub enum Backend {
    Cdp(Automation<CdpEngine>),
    WebDriver(Automation<WebDriverEngine>),
}

impl Backend {
    pub fn from_config(config: &Config) -> Result<Self> {
        let webdriver = |browser_type| {
            Automation::from_config(WebDriverEngine::from_config(browser_type, config), config)
        };

        Ok(match config.browser.engine {
            EngineKind::Chrome => Backend::Cdp(Automation::from_config(CdpEngine::new(), config)?),
            EngineKind::Firefox => Backend::WebDriver(webdriver(BrowserType::Firefox)?),
            EngineKind::Chromedriver => Backend::WebDriver(webdriver(BrowserType::Chrome)?),
        })
    }
}
