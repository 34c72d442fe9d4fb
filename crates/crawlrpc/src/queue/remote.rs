//! Queue store client for a remote hub (see `transport::http`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::time::Instant;

use super::{QueueError, QueueStore};

/// Slack added on top of a bounded pop so the hub answers before the HTTP
/// request itself times out.
const POP_REQUEST_SLACK: Duration = Duration::from_secs(5);

/// Longest single wait asked of the hub. Longer pops are re-issued, so a
/// popper that went away leaves no waiter behind for longer than this.
const LONG_POLL: Duration = Duration::from_secs(25);

#[derive(Debug, Deserialize)]
pub struct QueueStats {
    pub len: usize,
    #[serde(default)]
    pub waiting: usize,
}

pub struct HttpQueueStore {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpQueueStore {
    pub fn new(base_url: &str) -> Result<Self, QueueError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| QueueError::Transport(format!("invalid hub url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(QueueError::Transport(format!(
                "hub url cannot be a base: {base_url}"
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| QueueError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, client })
    }

    fn queue_url(&self, key: &str, action: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("queues").push(key);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        url
    }

    /// Stored payloads and blocked poppers for `key` as seen by the hub.
    pub async fn stats(&self, key: &str) -> Result<QueueStats, QueueError> {
        let response = self
            .client
            .get(self.queue_url(key, Some("len")))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(transport)?;
        let response = expect_success(response)?;
        response.json().await.map_err(transport)
    }
}

fn transport(e: reqwest::Error) -> QueueError {
    QueueError::Transport(e.to_string())
}

fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, QueueError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(QueueError::Transport(format!("hub returned {status}")))
    }
}

#[async_trait]
impl QueueStore for HttpQueueStore {
    async fn push(&self, key: &str, payload: String) -> Result<(), QueueError> {
        let response = self
            .client
            .post(self.queue_url(key, None))
            .timeout(Duration::from_secs(30))
            .body(payload)
            .send()
            .await
            .map_err(transport)?;
        expect_success(response)?;
        Ok(())
    }

    async fn pop(&self, key: &str, timeout: Option<Duration>) -> Result<Option<String>, QueueError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let wait = remaining.map_or(LONG_POLL, |r| r.min(LONG_POLL));
            let chunked = remaining.is_none_or(|r| r > LONG_POLL);

            // Rounded up so the hub never waits less than asked. A zero wait
            // would read as "forever" on the hub.
            let millis = wait.as_nanos().div_ceil(1_000_000).max(1);
            let response = self
                .client
                .get(self.queue_url(key, Some("pop")))
                .query(&[("timeout_ms", millis.to_string())])
                .timeout(wait + POP_REQUEST_SLACK)
                .send()
                .await
                .map_err(transport)?;

            match response.status() {
                StatusCode::OK => return response.text().await.map(Some).map_err(transport),
                StatusCode::NO_CONTENT if chunked => continue,
                StatusCode::NO_CONTENT => return Ok(None),
                status => return Err(QueueError::Transport(format!("hub returned {status}"))),
            }
        }
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        Ok(self.stats(key).await?.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn rejects_invalid_url() {
        assert!(matches!(
            HttpQueueStore::new("not a url"),
            Err(QueueError::Transport(_))
        ));
    }

    #[test]
    fn queue_url_encodes_key_as_one_segment() {
        let store = HttpQueueStore::new("http://hub:6390/").unwrap();
        assert_eq!(
            store.queue_url("rpc:node-1", Some("pop")).as_str(),
            "http://hub:6390/queues/rpc:node-1/pop"
        );
        assert_eq!(
            store.queue_url("rpc:a/b", None).as_str(),
            "http://hub:6390/queues/rpc:a%2Fb"
        );
    }

    #[tokio::test]
    async fn push_posts_payload() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/queues/rpc:node-1"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpQueueStore::new(&server.uri()).unwrap();
        store.push("rpc:node-1", "payload".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn push_maps_server_error_to_transport() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = HttpQueueStore::new(&server.uri()).unwrap();
        let err = store.push("rpc:node-1", "payload".to_string()).await;
        assert!(matches!(err, Err(QueueError::Transport(_))));
    }

    #[tokio::test]
    async fn pop_returns_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/queues/rpc:node-1/pop"))
            .and(|req: &wiremock::Request| {
                // Whatever elapsed before the request went out is taken off,
                // but never a whole millisecond more.
                req.url
                    .query_pairs()
                    .find(|(k, _)| k == "timeout_ms")
                    .and_then(|(_, v)| v.parse::<u64>().ok())
                    .is_some_and(|ms| (1490..=1500).contains(&ms))
            })
            .respond_with(ResponseTemplate::new(200).set_body_string("reply"))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpQueueStore::new(&server.uri()).unwrap();
        let popped = store
            .pop("rpc:node-1", Some(Duration::from_millis(1500)))
            .await
            .unwrap();
        assert_eq!(popped.as_deref(), Some("reply"));
    }

    #[tokio::test]
    async fn pop_no_content_is_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/queues/rpc:node-1/pop"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let store = HttpQueueStore::new(&server.uri()).unwrap();
        let popped = store
            .pop("rpc:node-1", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn unbounded_pop_is_issued_as_long_polls() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/queues/rpc:node-1/pop"))
            .and(query_param("timeout_ms", "25000"))
            .respond_with(ResponseTemplate::new(204))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/queues/rpc:node-1/pop"))
            .respond_with(ResponseTemplate::new(200).set_body_string("late"))
            .mount(&server)
            .await;

        let store = HttpQueueStore::new(&server.uri()).unwrap();
        let popped = store.pop("rpc:node-1", None).await.unwrap();
        assert_eq!(popped.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn len_reads_stats() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/queues/rpc:node-1/len"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"len": 3, "waiting": 1})),
            )
            .mount(&server)
            .await;

        let store = HttpQueueStore::new(&server.uri()).unwrap();
        assert_eq!(store.len("rpc:node-1").await.unwrap(), 3);
        assert_eq!(store.stats("rpc:node-1").await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn unreachable_hub_is_transport_error() {
        // Nothing listens on port 1.
        let store = HttpQueueStore::new("http://127.0.0.1:1").unwrap();
        let err = store.push("rpc:node-1", "payload".to_string()).await;
        assert!(matches!(err, Err(QueueError::Transport(_))));
    }

    #[tokio::test]
    async fn sub_millisecond_wait_rounds_up() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/queues/rpc:node-1/pop"))
            .and(query_param("timeout_ms", "2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpQueueStore::new(&server.uri()).unwrap();
        let popped = store
            .pop("rpc:node-1", Some(Duration::from_micros(1_500)))
            .await
            .unwrap();
        assert_eq!(popped, None);
    }
}
