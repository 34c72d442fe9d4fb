//! Client and node talking through a real queue hub over HTTP.

use std::sync::Arc;
use std::time::Duration;

use crawlrpc::{
    HttpQueueStore, MemoryQueueStore, MethodRegistry, NodeId, Params, RpcClient, RpcError,
    RpcServer, ServerHandle, StaticNode,
};
use tokio::net::TcpListener;

const NODE: &str = "node-7";
const KEY: &str = "rpc:node-7";

async fn start_hub() -> (String, Arc<MemoryQueueStore>) {
    let store = Arc::new(MemoryQueueStore::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = crawlrpc::transport::routes(store.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), store)
}

fn registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry.register_fn("echo", |node, msg| async move {
        format!("{node} says {}", msg.param("text"))
    });
    registry
}

fn start_node(url: &str) -> ServerHandle {
    let store = Arc::new(HttpQueueStore::new(url).unwrap());
    RpcServer::new(store, Arc::new(StaticNode::new(NODE)), registry()).start()
}

/// Block until the node has a pop outstanding at the hub.
async fn wait_for_node(hub: &MemoryQueueStore) {
    for _ in 0..500 {
        if hub.waiting(KEY) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("node never started waiting");
}

fn text(value: &str) -> Params {
    Params::from([("text".to_string(), value.to_string())])
}

#[tokio::test]
async fn call_round_trips_through_hub() {
    let (url, hub) = start_hub().await;
    let node = start_node(&url);
    wait_for_node(&hub).await;

    let client = RpcClient::new(Arc::new(HttpQueueStore::new(&url).unwrap()));
    let result = client
        .call(&NodeId::new(NODE), "echo", text("hi"), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(result, "node-7 says hi");

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn sequential_calls_through_hub() {
    let (url, hub) = start_hub().await;
    let node = start_node(&url);
    let client = RpcClient::new(Arc::new(HttpQueueStore::new(&url).unwrap()));

    for word in ["alpha", "beta", "gamma"] {
        wait_for_node(&hub).await;
        let result = client
            .call(&NodeId::new(NODE), "echo", text(word), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result, format!("node-7 says {word}"));
    }

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_method_times_out_through_hub() {
    let (url, hub) = start_hub().await;
    let node = start_node(&url);
    wait_for_node(&hub).await;

    let client = RpcClient::new(Arc::new(HttpQueueStore::new(&url).unwrap()));
    let err = client
        .call(&NodeId::new(NODE), "reboot", Params::new(), Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_hub_fails_fast() {
    let client = RpcClient::new(Arc::new(HttpQueueStore::new("http://127.0.0.1:1").unwrap()));
    let err = client
        .call(&NodeId::new(NODE), "echo", Params::new(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));
}
