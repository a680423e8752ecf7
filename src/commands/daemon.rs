use anyhow::Result;
use clap::Subcommand;

use crate::config::{Config, ConfigOverrides};
use crate::daemon::{Daemon, DaemonClient};
use crate::protocol::{ToolRequest, ToolResponse};

use super::utils::Backend;

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Run the daemon (in foreground)
    Run,

    /// Start the daemon in the background
    Start,

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status,
}

fn wait_for_daemon() -> bool {
    // Browser start-up can take a few seconds on a cold cache
    for i in 0..10 {
        std::thread::sleep(std::time::Duration::from_millis(500));
        if Daemon::is_running() {
            return true;
        }
        if i == 0 {
            std::thread::sleep(std::time::Duration::from_millis(1500));
        }
    }
    false
}

fn report_start(started: bool, log_file: &std::path::Path) {
    if started {
        println!("Daemon started successfully");
        println!("Log file: {}", log_file.display());
    } else {
        eprintln!(
            "Failed to start daemon. Check log file: {}",
            log_file.display()
        );
    }
}

pub async fn handle_daemon(
    command: DaemonCommands,
    config: &Config,
    overrides: &ConfigOverrides,
) -> Result<()> {
    match command {
        DaemonCommands::Run => {
            if Daemon::is_running() {
                println!("Daemon is already running");
            } else {
                println!("Starting daemon with engine: {}...", config.browser.engine);
                match Backend::from_config(config)? {
                    Backend::Cdp(automation) => Daemon::run(automation).await?,
                    Backend::WebDriver(automation) => Daemon::run(automation).await?,
                }
            }
        }
        DaemonCommands::Start => {
            if Daemon::is_running() {
                println!("Daemon is already running");
            } else {
                println!("Starting daemon in background...");

                let log_dir = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
                let log_file = log_dir.join("pagetap-daemon.log");

                #[cfg(unix)]
                {
                    use nix::unistd::{ForkResult, fork, setsid};
                    use std::os::unix::io::AsRawFd;
                    use std::os::unix::process::CommandExt;

                    match unsafe { fork() } {
                        Ok(ForkResult::Parent { .. }) => {
                            report_start(wait_for_daemon(), &log_file);
                        }
                        Ok(ForkResult::Child) => {
                            let _ = setsid();

                            let log_fd = std::fs::OpenOptions::new()
                                .create(true)
                                .append(true)
                                .open(&log_file)?;
                            let log_fd = log_fd.as_raw_fd();
                            nix::unistd::dup2(log_fd, 1)?;
                            nix::unistd::dup2(log_fd, 2)?;
                            nix::unistd::close(0)?;

                            // Re-exec so the daemon gets a fresh Tokio runtime
                            let exe_path = std::env::current_exe()?;
                            let _ = std::process::Command::new(exe_path)
                                .args(overrides.to_args())
                                .arg("daemon")
                                .arg("run")
                                .exec();

                            std::process::exit(1);
                        }
                        Err(e) => {
                            eprintln!("Fork failed: {}", e);
                        }
                    }
                }

                #[cfg(not(unix))]
                {
                    let exe_path = std::env::current_exe()?;
                    let child = std::process::Command::new(&exe_path)
                        .args(overrides.to_args())
                        .arg("daemon")
                        .arg("run")
                        .stdin(std::process::Stdio::null())
                        .stdout(std::fs::File::create(&log_file)?)
                        .stderr(std::fs::File::create(&log_file)?)
                        .spawn()?;
                    std::mem::forget(child);

                    report_start(wait_for_daemon(), &log_file);
                }
            }
        }
        DaemonCommands::Stop => {
            if DaemonClient::is_daemon_running() {
                match DaemonClient::send_request(ToolRequest::Shutdown) {
                    Ok(_) => println!("Daemon stopped"),
                    Err(e) => println!("Failed to stop daemon: {}", e),
                }
            } else {
                println!("Daemon is not running");
            }
        }
        DaemonCommands::Status => {
            if DaemonClient::is_daemon_running() {
                match DaemonClient::send_request(ToolRequest::Ping) {
                    Ok(ToolResponse::Pong) => println!("Daemon is running"),
                    _ => println!("Daemon is not responding properly"),
                }
            } else {
                println!("Daemon is not running");
            }
        }
    }
    Ok(())
}
