//! Wire format for node RPC.
//!
//! # Architecture
//!
//! - **protocol**: Envelope (`RpcMessage`), method names, typed `Request`
//! - **codec**: JSON text encoding of the envelope for queue payloads

pub mod codec;
pub mod protocol;
