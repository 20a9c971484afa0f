//! shoal-api: operator API for the Shoal autoscaler.
//!
//! Lets operators pause autoscaling fleet-wide, read or override the
//! instance count of one service instance, and scrape the latest
//! autoscaling snapshots.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/v1/autoscaler/pause` | Pause switch state |
//! | POST | `/v1/autoscaler/pause` | Pause for `{minutes}` |
//! | DELETE | `/v1/autoscaler/pause` | Lift the pause |
//! | GET | `/v1/autoscaler/{service}/{instance}` | Desired instance count |
//! | POST | `/v1/autoscaler/{service}/{instance}` | Override `{desired_instances}` |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use shoal_core::{ConfigSource, ServiceAutoscalingInfo};
use shoal_state::StateStore;
use tokio::sync::RwLock;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub configs: Arc<dyn ConfigSource>,
    /// Latest snapshots, refreshed by the daemon after each cycle.
    pub snapshots: Arc<RwLock<Vec<ServiceAutoscalingInfo>>>,
}

impl ApiState {
    pub fn new(store: StateStore, configs: Arc<dyn ConfigSource>) -> Self {
        Self {
            store,
            configs,
            snapshots: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let autoscaler_routes = Router::new()
        .route(
            "/pause",
            get(handlers::get_pause)
                .post(handlers::pause)
                .delete(handlers::unpause),
        )
        .route(
            "/{service}/{instance}",
            get(handlers::get_instances).post(handlers::set_instances),
        );

    Router::new()
        .nest("/v1/autoscaler", autoscaler_routes)
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
