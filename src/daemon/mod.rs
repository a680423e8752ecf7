use anyhow::{Context, Result};
use interprocess::local_socket::{
    GenericFilePath, Listener, ListenerOptions, Name, Stream, ToFsName,
    traits::{ListenerExt, Stream as StreamTrait},
};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::automation::Automation;
use crate::driver::Engine;
use crate::protocol::{self, ToolRequest, ToolResponse};

/// A request waiting for the dispatcher, with the channel its answer goes back on
struct Job {
    request: ToolRequest,
    reply: oneshot::Sender<ToolResponse>,
}

/// Daemon that keeps one browser session alive between CLI calls
pub struct Daemon;

impl Daemon {
    fn get_socket_path() -> Result<PathBuf> {
        let runtime_dir = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .or_else(|| std::env::temp_dir().into())
            .context("Could not determine runtime directory")?;

        Ok(runtime_dir.join("pagetap-daemon.sock"))
    }

    fn get_socket_name() -> Result<Name<'static>> {
        let socket_path = Self::get_socket_path()?;
        let path_string = socket_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Socket path is not valid UTF-8"))?
            .to_owned();
        // Leaked once per process; the name lives as long as the daemon or client
        let path_str: &'static str = Box::leak(path_string.into_boxed_str());
        Ok(path_str.to_fs_name::<GenericFilePath>()?)
    }

    pub fn is_running() -> bool {
        if let Ok(name) = Self::get_socket_name() {
            // Connect only; an empty connection is ignored by the daemon
            Stream::connect(name).is_ok()
        } else {
            false
        }
    }

    /// Start the session, then serve socket requests until `shutdown`.
    pub async fn run<E: Engine>(mut automation: Automation<E>) -> Result<()> {
        if Self::is_running() {
            anyhow::bail!("Daemon is already running");
        }

        automation.start().await?;

        let socket_path = Self::get_socket_path()?;
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let name = Self::get_socket_name()?;
        let listener = ListenerOptions::new().name(name).create_sync()?;
        info!("Daemon listening on {:?}", socket_path);

        let (jobs, queue) = mpsc::unbounded_channel();
        std::thread::spawn(move || Self::accept_loop(listener, jobs));

        Self::dispatch_loop(&mut automation, queue).await;

        automation.stop().await;
        let _ = std::fs::remove_file(&socket_path);

        // Let the client read the shutdown reply before the process exits
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        info!("Daemon stopped");
        Ok(())
    }

    /// Owns the automation core; requests run one at a time in arrival order.
    async fn dispatch_loop<E: Engine>(
        automation: &mut Automation<E>,
        mut queue: mpsc::UnboundedReceiver<Job>,
    ) {
        while let Some(Job { request, reply }) = queue.recv().await {
            let shutdown = matches!(request, ToolRequest::Shutdown);
            info!("Received request: {}", request.name());

            let response = protocol::dispatch(automation, request).await;
            if reply.send(response).is_err() {
                debug!("Client went away before the response was ready");
            }

            if shutdown {
                info!("Daemon shutting down");
                break;
            }
        }
    }

    fn accept_loop(listener: Listener, jobs: mpsc::UnboundedSender<Job>) {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let jobs = jobs.clone();
                    std::thread::spawn(move || {
                        if let Err(e) = Self::handle_client(stream, &jobs) {
                            error!("Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
            if jobs.is_closed() {
                break;
            }
        }
    }

    fn handle_client(mut stream: Stream, jobs: &mpsc::UnboundedSender<Job>) -> Result<()> {
        let mut reader = BufReader::new(&mut stream);
        let mut request_line = String::new();
        let bytes_read = reader.read_line(&mut request_line)?;

        // Liveness probe from is_running()
        if bytes_read == 0 || request_line.trim().is_empty() {
            return Ok(());
        }

        let response = match serde_json::from_str::<ToolRequest>(request_line.trim_end()) {
            Ok(request) => {
                let (reply, answer) = oneshot::channel();
                jobs.send(Job { request, reply })
                    .map_err(|_| anyhow::anyhow!("Daemon is shutting down"))?;
                answer
                    .blocking_recv()
                    .context("Dispatcher dropped the request")?
            }
            Err(e) => ToolResponse::error(format!("Invalid request: {}", e), 1),
        };

        let response_json = serde_json::to_string(&response)?;
        stream.write_all(response_json.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }
}

/// Client for communicating with the daemon
pub struct DaemonClient;

impl DaemonClient {
    pub fn send_request(request: ToolRequest) -> Result<ToolResponse> {
        let name = Daemon::get_socket_name()?;

        let mut stream =
            Stream::connect(name).context("Failed to connect to daemon. Is it running?")?;

        let request_json = serde_json::to_string(&request)?;
        stream.write_all(request_json.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        match reader.read_line(&mut response_line) {
            Ok(0) => {
                anyhow::bail!("Daemon closed connection without sending response");
            }
            Ok(_) => {
                if response_line.trim().is_empty() {
                    anyhow::bail!("Received empty response from daemon");
                }
                let response: ToolResponse = serde_json::from_str(&response_line).context(
                    format!("Failed to parse daemon response: {}", response_line),
                )?;
                Ok(response)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_daemon_running() -> bool {
        Daemon::is_running()
    }
}

#[cfg(test)]
#[path = "../daemon_test.rs"]
mod daemon_test;
