//! Shared queue store that carries RPC traffic between nodes.
//!
//! Semantics follow a list-backed store such as Redis:
//! - `push` inserts at the head (LPUSH)
//! - `pop` blocks on the tail (BRPOP); blocked poppers are served in the
//!   order they started waiting
//!
//! Implementations:
//! - **MemoryQueueStore**: in-process lists (also backs the HTTP hub)
//! - **HttpQueueStore**: client for a hub served by `transport::http`

use std::time::Duration;

use async_trait::async_trait;

mod memory;
mod remote;

pub use memory::MemoryQueueStore;
pub use remote::{HttpQueueStore, QueueStats};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),

    #[error("queue store closed")]
    Closed,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a payload at the head of the list named `key`.
    async fn push(&self, key: &str, payload: String) -> Result<(), QueueError>;

    /// Remove a payload from the tail of `key`, waiting for one to arrive.
    ///
    /// `None` waits indefinitely. Returns `Ok(None)` if the wait elapsed
    /// without a payload.
    async fn pop(&self, key: &str, timeout: Option<Duration>) -> Result<Option<String>, QueueError>;

    /// Number of payloads currently stored under `key`.
    async fn len(&self, key: &str) -> Result<usize, QueueError>;
}

/// Convert a wait expressed in seconds, where 0 means forever.
pub fn wait_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
