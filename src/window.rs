//! Same-window message channel
//!
//! Models `window.postMessage` between the page context and the content
//! context: fire-and-forget, every listener sees every message, and a
//! message posted with nobody listening is simply lost.

use serde_json::Value;
use std::future::Future;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default number of undelivered messages a slow listener may fall behind
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Where the page posts outbound messages
pub trait PagePort: Send + Sync {
    fn post_message(&self, message: Value);
}

/// In-process broadcast bus standing in for the shared window
#[derive(Debug, Clone)]
pub struct WindowBus {
    tx: broadcast::Sender<Value>,
}

impl WindowBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `handler` on every message posted after this call
    ///
    /// Each message is handled on its own task so a slow handler never
    /// blocks delivery of the next message.
    pub fn spawn_listener<F, Fut>(&self, handler: F) -> JoinHandle<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        tokio::spawn(handler(message));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Window listener lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for WindowBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl PagePort for WindowBus {
    fn post_message(&self, message: Value) {
        // No receivers is not an error for postMessage
        let _ = self.tx.send(message);
    }
}
