//! Controller-side RPC client.
//!
//! A call pushes the request onto the target node's queue and then blocks
//! on that same queue for the reply. Requests and replies share the queue,
//! so only one call per node may be in flight; the client serializes calls
//! to the same node behind a per-node lock. Callers in other processes are
//! not covered by that lock.
//!
//! When no node is waiting, the caller's own pop gets its request back. That
//! payload is put back for the node and the wait continues, so a node that
//! never answers always surfaces as a timeout.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::bridge::codec;
use crate::bridge::protocol::{Lang, Method, Params, Request, RpcMessage};
use crate::error::RpcError;
use crate::installer::Dependency;
use crate::node::NodeId;
use crate::queue::QueueStore;

/// How long each built-in method waits for its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub install_lang: Duration,
    pub install_dep: Duration,
    pub uninstall_dep: Duration,
    pub get_installed_dep_list: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            install_lang: Method::InstallLang.default_timeout(),
            install_dep: Method::InstallDep.default_timeout(),
            uninstall_dep: Method::UninstallDep.default_timeout(),
            get_installed_dep_list: Method::GetInstalledDepList.default_timeout(),
        }
    }
}

impl CallTimeouts {
    pub fn for_method(&self, method: Method) -> Duration {
        match method {
            Method::InstallLang => self.install_lang,
            Method::InstallDep => self.install_dep,
            Method::UninstallDep => self.uninstall_dep,
            Method::GetInstalledDepList => self.get_installed_dep_list,
        }
    }
}

/// Whether a reply's id is checked against the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorrelationMode {
    /// Take whatever arrives first on the queue.
    #[default]
    Trust,
    /// Put back replies with a different id and keep waiting.
    Verify,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeouts: CallTimeouts,
    pub correlation: CorrelationMode,
    /// Pause after requeueing a foreign reply so its owner can take it.
    pub requeue_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeouts: CallTimeouts::default(),
            correlation: CorrelationMode::default(),
            requeue_backoff: Duration::from_millis(50),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_correlation(mut self, mode: CorrelationMode) -> Self {
        self.correlation = mode;
        self
    }

    pub fn with_requeue_backoff(mut self, backoff: Duration) -> Self {
        self.requeue_backoff = backoff;
        self
    }
}

pub struct RpcClient {
    store: Arc<dyn QueueStore>,
    config: ClientConfig,
    in_flight: DashMap<NodeId, Arc<Mutex<()>>>,
}

impl RpcClient {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            config: ClientConfig::default(),
            in_flight: DashMap::new(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    fn node_lock(&self, node: &NodeId) -> Arc<Mutex<()>> {
        self.in_flight.entry(node.clone()).or_default().clone()
    }

    /// Invoke `method` on `node` and return the reply's result.
    ///
    /// Time spent waiting behind another call to the same node counts
    /// against `timeout`.
    pub async fn call(
        &self,
        node: &NodeId,
        method: &str,
        params: Params,
        timeout: Duration,
    ) -> Result<String, RpcError> {
        if timeout.is_zero() {
            return Err(RpcError::InvalidTimeout);
        }

        let deadline = Instant::now() + timeout;
        let timed_out = || RpcError::Timeout {
            node: node.clone(),
            method: method.to_string(),
            timeout,
        };

        let lock = self.node_lock(node);
        let _guard = tokio::time::timeout_at(deadline, lock.lock())
            .await
            .map_err(|_| timed_out())?;

        let request = RpcMessage::request(method, params);
        let key = node.queue_key();
        tracing::debug!(%node, id = %request.id, method, "Sending request");

        let encoded = codec::encode(&request)?;
        self.store.push(&key, encoded.clone()).await?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }

            let Some(payload) = self.store.pop(&key, Some(remaining)).await? else {
                tracing::debug!(%node, id = %request.id, method, "Call timed out");
                return Err(timed_out());
            };
            let reply = codec::decode(&payload)?;

            if !reply.reply && payload == encoded {
                tracing::trace!(%node, id = %request.id, "Request not yet taken, putting it back");
                self.requeue(&key, payload, deadline).await?;
                continue;
            }

            if self.config.correlation == CorrelationMode::Trust || reply.id == request.id {
                return Ok(reply.result);
            }

            tracing::debug!(
                %node,
                expected = %request.id,
                received = %reply.id,
                "Requeueing reply for another call"
            );
            self.requeue(&key, payload, deadline).await?;
        }
    }

    /// Put a payload back and give whoever it belongs to a chance to take it.
    async fn requeue(&self, key: &str, payload: String, deadline: Instant) -> Result<(), RpcError> {
        self.store.push(key, payload).await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(self.config.requeue_backoff.min(remaining)).await;
        Ok(())
    }

    /// Send a built-in request with its configured timeout.
    pub async fn send(&self, node: &NodeId, request: Request) -> Result<String, RpcError> {
        let method = request.method();
        let timeout = self.config.timeouts.for_method(method);
        self.call(node, method.as_str(), request.to_params(), timeout)
            .await
    }

    pub async fn install_lang(&self, node: &NodeId, lang: Lang) -> Result<String, RpcError> {
        self.send(node, Request::InstallLang { lang }).await
    }

    pub async fn install_dep(
        &self,
        node: &NodeId,
        lang: Lang,
        dep_name: &str,
    ) -> Result<String, RpcError> {
        let dep_name = dep_name.to_string();
        self.send(node, Request::InstallDep { lang, dep_name })
            .await
    }

    pub async fn uninstall_dep(
        &self,
        node: &NodeId,
        lang: Lang,
        dep_name: &str,
    ) -> Result<String, RpcError> {
        let dep_name = dep_name.to_string();
        self.send(node, Request::UninstallDep { lang, dep_name })
            .await
    }

    /// List dependencies installed on `node`. An empty result is an empty list.
    pub async fn get_installed_dep_list(
        &self,
        node: &NodeId,
        lang: Lang,
    ) -> Result<Vec<Dependency>, RpcError> {
        let result = self
            .send(node, Request::GetInstalledDepList { lang })
            .await?;
        if result.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&result).map_err(|source| RpcError::InvalidResult {
            method: Method::GetInstalledDepList.to_string(),
            source,
        })
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
