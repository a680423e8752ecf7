use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::driver::EventStreams;
use crate::query::{self, EventQuery};
use crate::types::{ConsoleLogEntry, NetworkRequestEntry, ResourceType};

/// Append-only buffers for one session's console and network events
#[derive(Default)]
pub struct EventRecorder {
    console: Arc<RwLock<Vec<ConsoleLogEntry>>>,
    requests: Arc<RwLock<Vec<NetworkRequestEntry>>>,
    listeners: Vec<JoinHandle<()>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear both buffers and start draining the page's event feeds into them.
    pub async fn attach(&mut self, streams: EventStreams) {
        self.stop_listeners();
        self.console.write().await.clear();
        self.requests.write().await.clear();

        self.listeners
            .push(tokio::spawn(drain(streams.console, self.console.clone(), "console")));
        self.listeners
            .push(tokio::spawn(drain(streams.requests, self.requests.clone(), "network")));
        debug!("Event recorder attached");
    }

    /// Stop listening and clear both buffers.
    pub async fn detach(&mut self) {
        self.stop_listeners();
        self.console.write().await.clear();
        self.requests.write().await.clear();
        debug!("Event recorder detached");
    }

    pub async fn console_logs(&self, q: &EventQuery) -> Vec<ConsoleLogEntry> {
        let buffer = self.console.read().await;
        query::query_console(&buffer, q)
    }

    pub async fn network_requests(
        &self,
        q: &EventQuery,
        resource_type: Option<ResourceType>,
    ) -> Vec<NetworkRequestEntry> {
        let buffer = self.requests.read().await;
        query::query_network(&buffer, q, resource_type)
    }

    pub async fn console_len(&self) -> usize {
        self.console.read().await.len()
    }

    pub async fn requests_len(&self) -> usize {
        self.requests.read().await.len()
    }

    fn stop_listeners(&mut self) {
        for handle in self.listeners.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.stop_listeners();
    }
}

async fn drain<T: Send + Sync + 'static>(
    mut rx: UnboundedReceiver<T>,
    buffer: Arc<RwLock<Vec<T>>>,
    feed: &'static str,
) {
    while let Some(entry) = rx.recv().await {
        buffer.write().await.push(entry);
    }
    debug!("{} feed closed", feed);
}
