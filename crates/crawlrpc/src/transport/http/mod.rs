//! Queue hub over HTTP, backed by a `MemoryQueueStore`.

mod routes;
mod server;

pub use routes::routes;
pub use server::{HubConfig, serve, shutdown_signal};
