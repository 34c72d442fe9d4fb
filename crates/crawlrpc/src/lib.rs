//! crawlrpc: request/reply RPC between a crawler controller and its worker
//! nodes, carried over a shared node-keyed queue store.
//!
//! - [`RpcClient`] pushes a request onto `rpc:<nodeId>` and blocks on the
//!   same key for the reply.
//! - [`RpcServer`] runs on each node, pops requests, dispatches them through
//!   a [`MethodRegistry`] and pushes replies back.
//! - [`queue`] holds the store abstraction with in-memory and HTTP backends;
//!   [`transport`] serves the in-memory store over HTTP.

pub mod bridge;
pub mod client;
pub mod error;
pub mod installer;
pub mod node;
pub mod queue;
pub mod registry;
pub mod server;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use bridge::protocol::{Lang, Method, Params, Request, RequestId, RpcMessage};
pub use client::{CallTimeouts, ClientConfig, CorrelationMode, RpcClient};
pub use error::RpcError;
pub use installer::{Dependency, InstallError, Installer, InstallerConfig, SystemInstaller};
pub use node::{NodeError, NodeId, NodeResolver, StaticNode};
pub use queue::{HttpQueueStore, MemoryQueueStore, QueueError, QueueStore};
pub use registry::{Handler, MethodRegistry};
pub use server::{RpcServer, ServerConfig, ServerError, ServerHandle, ServerState};
