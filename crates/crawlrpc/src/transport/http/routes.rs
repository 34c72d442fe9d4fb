//! HTTP route handlers for the queue hub.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::queue::{MemoryQueueStore, QueueStore};

#[derive(Debug, Deserialize)]
pub struct PopQuery {
    /// Absent or 0 waits until a payload arrives.
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    pub len: usize,
    pub waiting: usize,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn push(
    State(store): State<Arc<MemoryQueueStore>>,
    Path(key): Path<String>,
    payload: String,
) -> Response {
    match store.push(&key, payload).await {
        Ok(()) => {
            tracing::trace!(%key, "Payload pushed");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            tracing::error!(%key, error = %e, "Push failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn pop(
    State(store): State<Arc<MemoryQueueStore>>,
    Path(key): Path<String>,
    Query(query): Query<PopQuery>,
) -> Response {
    let timeout = (query.timeout_ms > 0).then(|| Duration::from_millis(query.timeout_ms));

    // If the caller disconnects, this future is dropped and the store puts
    // any payload already handed to it back on the tail.
    match store.pop(&key, timeout).await {
        Ok(Some(payload)) => (StatusCode::OK, payload).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(%key, error = %e, "Pop failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn stats(
    State(store): State<Arc<MemoryQueueStore>>,
    Path(key): Path<String>,
) -> Json<QueueStatsResponse> {
    Json(QueueStatsResponse {
        len: store.stored(&key),
        waiting: store.waiting(&key),
    })
}

pub fn routes(store: Arc<MemoryQueueStore>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/queues/{key}", post(push))
        .route("/queues/{key}/pop", get(pop))
        .route("/queues/{key}/len", get(stats))
        .with_state(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn response_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = routes(Arc::new(MemoryQueueStore::new()));

        let response = app
            .oneshot(Request::get("/health-check").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn push_then_pop_returns_payload() {
        let store = Arc::new(MemoryQueueStore::new());
        let app = routes(Arc::clone(&store));

        let response = app
            .clone()
            .oneshot(
                Request::post("/queues/rpc:node-1")
                    .body(Body::from(r#"{"id":"a"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(store.stored("rpc:node-1"), 1);

        let response = app
            .oneshot(
                Request::get("/queues/rpc:node-1/pop?timeout_ms=100")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, r#"{"id":"a"}"#);
        assert_eq!(store.stored("rpc:node-1"), 0);
    }

    #[tokio::test]
    async fn pop_times_out_with_no_content() {
        let app = routes(Arc::new(MemoryQueueStore::new()));

        let response = app
            .oneshot(
                Request::get("/queues/rpc:node-1/pop?timeout_ms=10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn percent_encoded_key_is_decoded() {
        let store = Arc::new(MemoryQueueStore::new());
        let app = routes(Arc::clone(&store));

        let response = app
            .oneshot(
                Request::post("/queues/rpc:a%2Fb")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(store.stored("rpc:a/b"), 1);
    }

    #[tokio::test]
    async fn len_reports_stored_and_waiting() {
        let store = Arc::new(MemoryQueueStore::new());
        store.push("rpc:node-1", "a".to_string()).await.unwrap();
        store.push("rpc:node-1", "b".to_string()).await.unwrap();
        let app = routes(store);

        let response = app
            .oneshot(
                Request::get("/queues/rpc:node-1/len")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value =
            serde_json::from_str(&response_text(response).await).unwrap();
        assert_eq!(json, serde_json::json!({"len": 2, "waiting": 0}));
    }
}
