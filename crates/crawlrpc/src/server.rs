//! Node-side RPC server loop.
//!
//! One loop per node. Each iteration resolves the node identity, blocks on
//! the node's queue, dispatches the request through the [`MethodRegistry`]
//! and pushes the reply back onto the same queue.
//!
//! A reply nobody was waiting for comes back to the loop on its next
//! receive. It is never dispatched. It is put back once so a late caller can
//! still take it, and dropped if it turns up again.
//!
//! Two ways to stop:
//! - [`ServerHandle::request_stop`] sets a flag the loop checks between
//!   messages. With an unbounded receive and no traffic the loop never sees
//!   it; this is best-effort and kept for callers that rely on it.
//! - [`ServerHandle::shutdown`] cancels the loop, which interrupts a blocked
//!   receive. A handler already running is allowed to finish and its reply
//!   is still pushed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::codec;
use crate::bridge::protocol::RequestId;
use crate::node::{NodeId, NodeResolver};
use crate::queue::QueueStore;
use crate::registry::MethodRegistry;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `None` blocks on the queue indefinitely.
    pub receive_timeout: Option<Duration>,
    /// Pause between failed node resolutions or queue errors, and after
    /// putting back an unclaimed reply.
    pub retry_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let retry_delay = std::env::var("CRAWLRPC_RESOLVE_RETRY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(100));

        Self {
            receive_timeout: None,
            retry_delay,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each receive; a zero duration means unbounded.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Running,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct RpcServer {
    store: Arc<dyn QueueStore>,
    resolver: Arc<dyn NodeResolver>,
    registry: Arc<MethodRegistry>,
    config: ServerConfig,
}

impl RpcServer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        resolver: Arc<dyn NodeResolver>,
        registry: MethodRegistry,
    ) -> Self {
        Self {
            store,
            resolver,
            registry: Arc::new(registry),
            config: ServerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the loop on the current runtime.
    pub fn start(self) -> ServerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ServerState::Running);

        let task = tokio::spawn({
            let stop = stop.clone();
            let cancel = cancel.clone();
            async move {
                self.run(&stop, &cancel).await;
                let _ = state_tx.send(ServerState::Stopped);
            }
        });

        ServerHandle {
            stop,
            cancel,
            state: state_rx,
            task,
        }
    }

    async fn run(&self, stop: &AtomicBool, cancel: &CancellationToken) {
        tracing::info!(methods = ?self.registry.methods(), "RPC server loop started");

        let mut returned: Option<RequestId> = None;

        while !stop.load(Ordering::SeqCst) {
            let node = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                node = self.resolve_node() => node,
            };
            let key = node.queue_key();

            let popped = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                popped = self.store.pop(&key, self.config.receive_timeout) => popped,
            };

            let payload = match popped {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    tracing::trace!(%node, "Receive timed out");
                    continue;
                }
                Err(e) => {
                    tracing::error!(%node, error = %e, "Failed to receive from queue");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_delay) => continue,
                    }
                }
            };

            if self.process(&node, &key, &payload, &mut returned).await == Outcome::PutBack {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }

        tracing::info!("RPC server loop stopped");
    }

    async fn resolve_node(&self) -> NodeId {
        loop {
            match self.resolver.current_node_id().await {
                Ok(node) => return node,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to resolve node identity, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// Decode, dispatch and reply to one payload. Never fails the loop.
    ///
    /// `returned` remembers the last unclaimed reply put back.
    async fn process(
        &self,
        node: &NodeId,
        key: &str,
        payload: &str,
        returned: &mut Option<RequestId>,
    ) -> Outcome {
        let msg = match codec::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(%node, error = %e, "Dropping malformed request");
                return Outcome::Done;
            }
        };

        if msg.reply {
            if returned.as_ref() == Some(&msg.id) {
                tracing::debug!(%node, id = %msg.id, method = %msg.method, "Discarding unclaimed reply");
                *returned = None;
                return Outcome::Done;
            }
            tracing::trace!(%node, id = %msg.id, "Putting back reply for its caller");
            if let Err(e) = self.store.push(key, payload.to_string()).await {
                tracing::error!(%node, id = %msg.id, error = %e, "Failed to put back reply");
                return Outcome::Done;
            }
            *returned = Some(msg.id);
            return Outcome::PutBack;
        }

        let Some(handler) = self.registry.get(&msg.method) else {
            tracing::debug!(%node, id = %msg.id, method = %msg.method, "Skipping unknown method");
            return Outcome::Done;
        };

        let id = msg.id.clone();
        tracing::debug!(%node, %id, method = %msg.method, "Handling request");
        let reply = handler.handle(node, msg).await;

        let encoded = match codec::encode(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(%node, %id, error = %e, "Failed to encode reply");
                return Outcome::Done;
            }
        };

        if let Err(e) = self.store.push(key, encoded).await {
            tracing::error!(%node, %id, error = %e, "Failed to push reply");
        }
        Outcome::Done
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Done,
    /// An unclaimed reply went back on the queue; pause before receiving.
    PutBack,
}

/// Handle to a running server loop.
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    cancel: CancellationToken,
    state: watch::Receiver<ServerState>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Ask the loop to stop after the message it is currently waiting on.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Cancel the loop, interrupting a blocked receive, and wait for it.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.cancel.cancel();
        self.join().await
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolve once the loop reaches `Stopped`.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // A dropped sender means the task is gone, which is also stopped.
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }

    pub async fn join(self) -> Result<(), ServerError> {
        self.task.await?;
        Ok(())
    }
}
