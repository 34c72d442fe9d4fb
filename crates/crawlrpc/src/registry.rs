//! Method registry: maps method names to handlers.
//!
//! Every handler turns a request envelope into its reply. Handlers never
//! fail; collaborator errors are folded into the result string so a caller
//! always gets an answer.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::protocol::{Method, Request, RpcMessage};
use crate::installer::Installer;
use crate::node::NodeId;

/// Result returned by list handlers when the listing cannot be produced.
pub const EMPTY_LIST: &str = "[]";

#[async_trait]
pub trait Handler: Send + Sync {
    /// Produce the reply for `msg`, keeping its id, method and params.
    async fn handle(&self, node: &NodeId, msg: RpcMessage) -> RpcMessage;
}

type BoxFuture = Pin<Box<dyn Future<Output = String> + Send>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(NodeId, RpcMessage) -> BoxFuture + Send + Sync,
{
    async fn handle(&self, node: &NodeId, msg: RpcMessage) -> RpcMessage {
        let result = (self.0)(node.clone(), msg.clone()).await;
        msg.into_reply(result)
    }
}

#[derive(Default, Clone)]
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in methods backed by `installer`.
    pub fn with_builtins(installer: Arc<dyn Installer>) -> Self {
        let handler: Arc<dyn Handler> = Arc::new(BuiltinHandler { installer });
        let mut registry = Self::new();
        for method in Method::ALL {
            registry.register(method.as_str(), handler.clone());
        }
        registry
    }

    /// Register a handler, replacing any previous one for `method`.
    pub fn register(&mut self, method: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(method.into(), handler);
    }

    /// Register a closure computing the result string.
    pub fn register_fn<F, Fut>(&mut self, method: impl Into<String>, f: F)
    where
        F: Fn(NodeId, RpcMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        let boxed = move |node: NodeId, msg: RpcMessage| -> BoxFuture { Box::pin(f(node, msg)) };
        self.register(method, Arc::new(FnHandler(boxed)));
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

struct BuiltinHandler {
    installer: Arc<dyn Installer>,
}

impl BuiltinHandler {
    async fn result_for(&self, node: &NodeId, request: Request) -> String {
        match request {
            Request::InstallLang { lang } => {
                match self.installer.install_language(&lang).await {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(%node, %lang, error = %e, "Language install failed");
                        e.output().to_string()
                    }
                }
            }
            Request::InstallDep { lang, dep_name } => {
                match self.installer.install_dependency(&lang, &dep_name).await {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(%node, %lang, %dep_name, error = %e, "Dependency install failed");
                        e.output().to_string()
                    }
                }
            }
            Request::UninstallDep { lang, dep_name } => {
                match self.installer.uninstall_dependency(&lang, &dep_name).await {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(%node, %lang, %dep_name, error = %e, "Dependency uninstall failed");
                        e.output().to_string()
                    }
                }
            }
            Request::GetInstalledDepList { lang } => {
                let deps = match self.installer.list_installed_dependencies(&lang).await {
                    Ok(deps) => deps,
                    Err(e) => {
                        tracing::warn!(%node, %lang, error = %e, "Dependency listing failed");
                        return EMPTY_LIST.to_string();
                    }
                };
                serde_json::to_string(&deps).unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Failed to encode dependency list");
                    EMPTY_LIST.to_string()
                })
            }
        }
    }
}

#[async_trait]
impl Handler for BuiltinHandler {
    async fn handle(&self, node: &NodeId, msg: RpcMessage) -> RpcMessage {
        let result = match Request::from_message(&msg) {
            Ok(request) => self.result_for(node, request).await,
            Err(e) => {
                tracing::warn!(%node, id = %msg.id, error = %e, "Invalid request parameters");
                String::new()
            }
        };
        msg.into_reply(result)
    }
}
