//! Minimal HTTP/1 JSON client for polling task and agent endpoints.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::de::DeserializeOwned;
use tracing::debug;

const USER_AGENT: &str = "shoal-autoscaler/0.1";

/// Why a JSON fetch produced nothing.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Body(String),
}

/// GET `http://{address}/{path}` and decode the body as JSON.
///
/// The whole exchange, connect included, is bounded by `timeout`.
pub async fn fetch_json<T: DeserializeOwned>(
    address: &str,
    path: &str,
    timeout: Duration,
) -> Result<T, FetchError> {
    let target = format!("/{}", path.trim_start_matches('/'));

    let body = tokio::time::timeout(timeout, fetch_body(address, &target))
        .await
        .map_err(|_| {
            debug!(%address, %target, "fetch timed out");
            FetchError::Timeout(timeout)
        })??;

    serde_json::from_slice(&body).map_err(|e| FetchError::Body(e.to_string()))
}

async fn fetch_body(address: &str, target: &str) -> Result<Bytes, FetchError> {
    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| FetchError::Connect(e.to_string()))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| FetchError::Connect(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(target)
        .header("host", address)
        .header("user-agent", USER_AGENT)
        .header("accept", "application/json")
        .body(Empty::<Bytes>::new())
        .map_err(|e| FetchError::Connect(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| FetchError::Connect(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        debug!(%status, %address, %target, "fetch non-2xx");
        return Err(FetchError::Status(status.as_u16()));
    }

    let collected = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| FetchError::Body(e.to_string()))?;
    Ok(collected.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use serde_json::{Value, json};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn fetches_json_body() {
        let addr = serve(Router::new().route(
            "/status",
            get(|| async { axum::Json(json!({"utilization": 0.5})) }),
        ))
        .await;

        let body: Value = fetch_json(&addr, "status", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(body["utilization"], 0.5);
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let addr = serve(Router::new()).await;
        let err = fetch_json::<Value>(&addr, "/missing", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status(404)));
    }

    #[tokio::test]
    async fn malformed_body_is_error() {
        let addr = serve(Router::new().route("/status", get(|| async { "not json" }))).await;
        let err = fetch_json::<Value>(&addr, "status", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Body(_)));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let addr = serve(Router::new().route(
            "/status",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        ))
        .await;

        let err = fetch_json::<Value>(&addr, "status", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = fetch_json::<Value>(&addr, "status", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Connect(_)));
    }
}
