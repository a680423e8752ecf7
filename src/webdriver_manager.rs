use anyhow::{Context, Result};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::webdriver::BrowserType;

/// Owns the geckodriver/chromedriver process a WebDriver engine talks to
#[derive(Default)]
pub struct WebDriverManager {
    process: Option<WebDriverProcess>,
}

struct WebDriverProcess {
    browser_type: BrowserType,
    child: Child,
    port: u16,
    url: String,
    #[cfg(unix)]
    process_group_id: Option<i32>,
}

impl WebDriverManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a WebDriver is running for the given browser type.
    /// Returns the URL to connect to.
    pub async fn ensure_driver(&mut self, browser_type: BrowserType) -> Result<String> {
        if let Some(process) = &self.process {
            if process.browser_type == browser_type && Self::verify_driver_working(&process.url).await
            {
                debug!("Using existing managed WebDriver at {}", process.url);
                return Ok(process.url.clone());
            }
            // Wrong browser or wedged driver
            self.stop();
        }

        let standard_url = browser_type.default_url();
        if Self::verify_driver_working(standard_url).await {
            debug!("Found external WebDriver at {}", standard_url);
            return Ok(standard_url.to_string());
        }

        info!("WebDriver not detected, attempting to start automatically...");
        self.start_driver(browser_type).await
    }

    async fn start_driver(&mut self, browser_type: BrowserType) -> Result<String> {
        let command = browser_type.driver_command();
        let port = Self::find_free_port_for_browser(browser_type)?;
        let args = match browser_type {
            BrowserType::Firefox => vec!["--port".to_string(), port.to_string()],
            BrowserType::Chrome => vec![format!("--port={}", port)],
        };
        info!("Starting {} on port {}", command, port);

        if !Self::command_exists(command) {
            anyhow::bail!(
                "{} not found in PATH. Please install it:\n\
                  macOS: brew install {}\n\
                  Linux: Download from official releases",
                command,
                command
            );
        }

        let mut cmd = Command::new(command);
        cmd.args(&args).stdout(Stdio::null()).stderr(Stdio::null());

        // New process group so the driver and its browser die together
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {}", command))?;

        #[cfg(unix)]
        let process_group_id = Some(child.id() as i32);

        let url = format!("http://localhost:{}", port);
        self.process = Some(WebDriverProcess {
            browser_type,
            child,
            port,
            url: url.clone(),
            #[cfg(unix)]
            process_group_id,
        });

        // 3 seconds total
        let max_attempts = 30;
        for attempt in 1..=max_attempts {
            if Self::is_driver_running(&url).await {
                info!("WebDriver started successfully on port {}", port);
                return Ok(url);
            }
            if attempt < max_attempts {
                sleep(Duration::from_millis(100)).await;
            }
        }

        self.stop();
        anyhow::bail!("{} failed to start within timeout", command)
    }

    /// Check if a command exists in PATH
    pub fn command_exists(command: &str) -> bool {
        #[cfg(unix)]
        let finder = "which";
        #[cfg(windows)]
        let finder = "where";

        Command::new(finder)
            .arg(command)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Find a free port, preferring the driver's customary ones
    pub fn find_free_port_for_browser(browser_type: BrowserType) -> Result<u16> {
        let preferred_ports = match browser_type {
            BrowserType::Firefox => [4444, 4445, 4446],
            BrowserType::Chrome => [9515, 9516, 9517],
        };

        for port in preferred_ports {
            if !Self::is_port_in_use(port) {
                debug!("Found free port {} for {:?}", port, browser_type);
                return Ok(port);
            }
            debug!("Port {} is in use for {:?}", port, browser_type);
        }

        // Fall back to letting OS assign a port
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);
        Ok(port)
    }

    pub fn is_port_in_use(port: u16) -> bool {
        std::net::TcpListener::bind(("127.0.0.1", port)).is_err()
    }

    /// Check if WebDriver answers at the given URL
    pub async fn is_driver_running(url: &str) -> bool {
        let status_url = format!("{}/status", url);

        match reqwest::Client::new()
            .get(&status_url)
            .timeout(Duration::from_secs(1))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// A working driver reports `value.ready == true`
    async fn verify_driver_working(url: &str) -> bool {
        let status_url = format!("{}/status", url);

        match reqwest::Client::new()
            .get(&status_url)
            .timeout(Duration::from_secs(1))
            .send()
            .await
        {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(body) => body
                    .get("value")
                    .and_then(|v| v.get("ready"))
                    .and_then(|r| r.as_bool())
                    .unwrap_or(false),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    /// Kill the managed driver, if any
    pub fn stop(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        debug!("Stopping WebDriver on port {}", process.port);

        #[cfg(unix)]
        if let Some(pgid) = process.process_group_id {
            info!(
                "Killing process group {} for {}",
                pgid,
                process.browser_type.driver_command()
            );
            Self::kill_process_group(pgid);
        }

        if let Err(e) = process.child.kill() {
            debug!("Driver process already gone: {}", e);
        }
        if let Err(e) = process.child.wait() {
            warn!("Failed to reap driver process: {}", e);
        }
    }

    /// SIGTERM the group, then SIGKILL whatever is left
    #[cfg(unix)]
    fn kill_process_group(pgid: i32) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let group = Pid::from_raw(pgid);
        if let Err(e) = killpg(group, Signal::SIGTERM) {
            debug!("Failed to send SIGTERM to process group {}: {}", pgid, e);
            return;
        }

        std::thread::sleep(Duration::from_millis(100));

        if let Err(e) = killpg(group, Signal::SIGKILL) {
            debug!("Process group {} exited after SIGTERM: {}", pgid, e);
        }
    }
}

impl Drop for WebDriverManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "webdriver_manager_test.rs"]
mod webdriver_manager_test;
