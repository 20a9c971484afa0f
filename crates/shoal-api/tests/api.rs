//! Operator API tests against a SOA directory on disk and the in-memory
//! coordination store.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use shoal_api::{ApiState, build_router};
use shoal_core::{ServiceAutoscalingInfo, SoaDir};
use shoal_state::{StateStore, records};

const WEB_TOML: &str = r#"
[main]
min_instances = 3
max_instances = 10
deployment = "registry/web:1"

[fixed]
deployment = "registry/web:1"
"#;

struct Harness {
    _dir: tempfile::TempDir,
    store: StateStore,
    state: ApiState,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("web")).unwrap();
        std::fs::write(dir.path().join("web").join("test.toml"), WEB_TOML).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let state = ApiState::new(store.clone(), Arc::new(SoaDir::new(dir.path(), "test")));
        Self {
            _dir: dir,
            store,
            state,
        }
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Pause ──────────────────────────────────────────────────────────

#[tokio::test]
async fn pause_status_defaults_to_running() {
    let harness = Harness::new();

    let resp = harness.router().oneshot(get("/v1/autoscaler/pause")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["paused"], false);
    assert!(body["data"]["expiry"].is_null());
}

#[tokio::test]
async fn pause_then_unpause() {
    let harness = Harness::new();
    let router = harness.router();

    let resp = router
        .clone()
        .oneshot(json_request("POST", "/v1/autoscaler/pause", serde_json::json!({ "minutes": 30 })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["paused"], true);
    assert!(body["data"]["until"].as_str().unwrap().ends_with("UTC"));
    assert!(records::pause_expiry(&harness.store).unwrap().is_some());

    let req = Request::builder()
        .method("DELETE")
        .uri("/v1/autoscaler/pause")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["unpaused"], true);

    let body = body_json(router.oneshot(get("/v1/autoscaler/pause")).await.unwrap()).await;
    assert_eq!(body["data"]["paused"], false);
}

#[tokio::test]
async fn zero_minute_pause_is_rejected() {
    let harness = Harness::new();

    let resp = harness
        .router()
        .oneshot(json_request("POST", "/v1/autoscaler/pause", serde_json::json!({ "minutes": 0 })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(records::pause_expiry(&harness.store).unwrap(), None);
}

#[tokio::test]
async fn oversized_pause_is_rejected() {
    let harness = Harness::new();

    let resp = harness
        .router()
        .oneshot(json_request(
            "POST",
            "/v1/autoscaler/pause",
            serde_json::json!({ "minutes": u64::MAX }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(records::pause_expiry(&harness.store).unwrap(), None);
}

// ── Instances ──────────────────────────────────────────────────────

#[tokio::test]
async fn desired_instances_defaults_to_max() {
    let harness = Harness::new();

    let resp = harness
        .router()
        .oneshot(get("/v1/autoscaler/web/main"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["desired_instances"], 10);
}

#[tokio::test]
async fn desired_instances_reads_stored_count() {
    let harness = Harness::new();
    records::set_instances(&harness.store, "web", "main", 6).unwrap();

    let resp = harness
        .router()
        .oneshot(get("/v1/autoscaler/web/main"))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["data"]["desired_instances"], 6);
}

#[tokio::test]
async fn override_is_clamped_and_stored() {
    let harness = Harness::new();

    let resp = harness
        .router()
        .oneshot(json_request(
            "POST",
            "/v1/autoscaler/web/main",
            serde_json::json!({ "desired_instances": 50 }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["data"]["desired_instances"], 10);
    assert_eq!(
        body["data"]["status"],
        "WARNING desired_instances is greater than max_instances 10"
    );
    assert_eq!(records::get_instances(&harness.store, "web", "main").unwrap(), Some(10));
}

#[tokio::test]
async fn override_within_range_succeeds() {
    let harness = Harness::new();

    let resp = harness
        .router()
        .oneshot(json_request(
            "POST",
            "/v1/autoscaler/web/main",
            serde_json::json!({ "desired_instances": 4 }),
        ))
        .await
        .unwrap();

    let body = body_json(resp).await;
    assert_eq!(body["data"]["status"], "SUCCESS");
    assert_eq!(records::get_instances(&harness.store, "web", "main").unwrap(), Some(4));
}

#[tokio::test]
async fn instance_without_autoscaling_is_not_found() {
    let harness = Harness::new();

    let resp = harness
        .router()
        .oneshot(json_request(
            "POST",
            "/v1/autoscaler/web/fixed",
            serde_json::json!({ "desired_instances": 4 }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(records::get_instances(&harness.store, "web", "fixed").unwrap(), None);
}

#[tokio::test]
async fn unknown_service_is_not_found() {
    let harness = Harness::new();

    let resp = harness
        .router()
        .oneshot(get("/v1/autoscaler/nope/main"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = harness
        .router()
        .oneshot(get("/v1/autoscaler/web/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Metrics ────────────────────────────────────────────────────────

#[tokio::test]
async fn metrics_render_latest_snapshots() {
    let harness = Harness::new();
    harness.state.snapshots.write().await.push(ServiceAutoscalingInfo {
        service: "web".to_string(),
        instance: "main".to_string(),
        current_instances: 4,
        min_instances: 3,
        max_instances: 10,
        current_utilization: Some(0.5),
        target_instances: Some(5),
    });

    let resp = harness.router().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("shoal_autoscaling_current_instances{service=\"web\",instance=\"main\"} 4"));
    assert!(text.contains("shoal_autoscaling_target_instances{service=\"web\",instance=\"main\"} 5"));
}
