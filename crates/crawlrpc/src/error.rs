//! Errors surfaced to RPC callers.

use std::time::Duration;

use crate::bridge::codec::CodecError;
use crate::node::NodeId;
use crate::queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] QueueError),

    #[error("no reply from node {node} to {method} within {timeout:?}")]
    Timeout {
        node: NodeId,
        method: String,
        timeout: Duration,
    },

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] CodecError),

    #[error("call timeout must be greater than zero")]
    InvalidTimeout,

    #[error("invalid result for {method}: {source}")]
    InvalidResult {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_node_and_method() {
        let err = RpcError::Timeout {
            node: NodeId::new("n1"),
            method: "install_dep".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "no reply from node n1 to install_dep within 10s"
        );
    }

    #[test]
    fn transport_is_not_timeout() {
        let err = RpcError::from(QueueError::Closed);
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "queue store closed");
    }
}
