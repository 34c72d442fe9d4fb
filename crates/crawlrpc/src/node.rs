//! Node identity and queue addressing.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const QUEUE_KEY_PREFIX: &str = "rpc:";

/// Stable identifier of a worker node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The node's mailbox, shared by requests and replies.
    pub fn queue_key(&self) -> String {
        format!("{QUEUE_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node identity unavailable: {0}")]
    Unavailable(String),
}

/// Resolves the identity of the node this process runs as.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    async fn current_node_id(&self) -> Result<NodeId, NodeError>;
}

/// Resolver for a node whose id is known up front.
#[derive(Debug, Clone)]
pub struct StaticNode(NodeId);

impl StaticNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self(NodeId::new(id))
    }
}

#[async_trait]
impl NodeResolver for StaticNode {
    async fn current_node_id(&self) -> Result<NodeId, NodeError> {
        Ok(self.0.clone())
    }
}
