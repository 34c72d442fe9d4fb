//! Transport layer for sharing a queue store between processes.
//!
//! Currently provides an HTTP hub via axum; `queue::HttpQueueStore` is its
//! client.

pub mod http;

pub use http::{HubConfig, routes, serve, shutdown_signal};
