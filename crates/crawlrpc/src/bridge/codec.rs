//! Text codec for queue payloads.
//!
//! Queue entries are whole strings, so there is no length framing: one
//! payload is one JSON document holding one envelope.

use super::protocol::RpcMessage;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("payload is not a valid envelope: {0}")]
    Malformed(#[source] serde_json::Error),
}

pub fn encode(msg: &RpcMessage) -> Result<String, CodecError> {
    let json = serde_json::to_string(msg).map_err(CodecError::Encode)?;
    let json_len = json.len();
    tracing::trace!(json_size_bytes = json_len, "Encoding envelope");
    if json_len > 100_000 {
        tracing::info!(
            json_size_bytes = json_len,
            json_size_kb = json_len / 1024,
            method = %msg.method,
            "Large envelope being encoded"
        );
    }
    Ok(json)
}

pub fn decode(payload: &str) -> Result<RpcMessage, CodecError> {
    serde_json::from_str(payload).map_err(CodecError::Malformed)
}
