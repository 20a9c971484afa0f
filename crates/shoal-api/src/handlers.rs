//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::info;

use shoal_core::{ConfigError, ServiceInstanceConfig};
use shoal_state::records;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn format_expiry(expiry: f64) -> String {
    chrono::DateTime::from_timestamp(expiry as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ── Pause ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PauseStatus {
    pub paused: bool,
    /// Epoch seconds the pause lasts until, if one is set.
    pub expiry: Option<f64>,
    /// `expiry` as a UTC timestamp.
    pub until: Option<String>,
}

fn pause_status(state: &ApiState) -> Result<PauseStatus, shoal_state::StateError> {
    let expiry = records::pause_expiry(&state.store)?;
    Ok(PauseStatus {
        paused: expiry.is_some_and(|expiry| epoch_now() < expiry),
        expiry,
        until: expiry.map(format_expiry),
    })
}

/// GET /v1/autoscaler/pause
pub async fn get_pause(State(state): State<ApiState>) -> impl IntoResponse {
    match pause_status(&state) {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Pause request body.
#[derive(Deserialize)]
pub struct PauseRequest {
    pub minutes: u64,
}

/// POST /v1/autoscaler/pause
pub async fn pause(State(state): State<ApiState>, Json(req): Json<PauseRequest>) -> impl IntoResponse {
    if req.minutes == 0 {
        return error_response("minutes must be positive", StatusCode::BAD_REQUEST);
    }
    let Some(seconds) = req.minutes.checked_mul(60) else {
        return error_response("minutes is too large", StatusCode::BAD_REQUEST);
    };
    let expiry = epoch_now() + seconds as f64;
    if let Err(e) = records::pause_until(&state.store, expiry) {
        return internal_error(e);
    }
    info!(minutes = req.minutes, until = %format_expiry(expiry), "autoscaling paused");
    match pause_status(&state) {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => internal_error(e),
    }
}

/// DELETE /v1/autoscaler/pause
pub async fn unpause(State(state): State<ApiState>) -> impl IntoResponse {
    match records::unpause(&state.store) {
        Ok(was_paused) => {
            info!(was_paused, "autoscaling unpaused");
            ApiResponse::ok(serde_json::json!({ "unpaused": was_paused })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Instances ──────────────────────────────────────────────────

/// Load an instance's config and check autoscaling is enabled for it.
fn autoscaled_config(
    state: &ApiState,
    service: &str,
    instance: &str,
) -> Result<(ServiceInstanceConfig, u32), axum::response::Response> {
    let config = match state.configs.load(service, instance) {
        Ok(config) => config,
        Err(e @ (ConfigError::NotFound { .. } | ConfigError::NotDeployed { .. })) => {
            return Err(error_response(&e.to_string(), StatusCode::NOT_FOUND));
        }
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            return Err(error_response(
                &format!("no configuration for {service}.{instance}"),
                StatusCode::NOT_FOUND,
            ));
        }
        Err(e) => return Err(internal_error(e)),
    };
    match config.max_instances {
        Some(max) => Ok((config, max)),
        None => Err(error_response(
            "Autoscaling is not enabled for this service instance",
            StatusCode::NOT_FOUND,
        )),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstancesResponse {
    pub desired_instances: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// GET /v1/autoscaler/:service/:instance
pub async fn get_instances(
    State(state): State<ApiState>,
    Path((service, instance)): Path<(String, String)>,
) -> impl IntoResponse {
    let (config, max) = match autoscaled_config(&state, &service, &instance) {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    match records::get_instances(&state.store, &service, &instance) {
        Ok(stored) => ApiResponse::ok(InstancesResponse {
            desired_instances: config.limit_instance_count(stored.unwrap_or(max)),
            status: None,
        })
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// Override request body.
#[derive(Deserialize)]
pub struct SetInstancesRequest {
    pub desired_instances: u32,
}

/// Clamp a requested count to the configured range, describing any change.
pub fn clamp_desired_instances(config: &ServiceInstanceConfig, desired: u32) -> (u32, String) {
    let clamped = config.limit_instance_count(desired);
    let status = if desired < config.min_instances {
        format!(
            "WARNING desired_instances is less than min_instances {}",
            config.min_instances
        )
    } else if clamped < desired {
        format!("WARNING desired_instances is greater than max_instances {clamped}")
    } else {
        "SUCCESS".to_string()
    };
    (clamped, status)
}

/// POST /v1/autoscaler/:service/:instance
pub async fn set_instances(
    State(state): State<ApiState>,
    Path((service, instance)): Path<(String, String)>,
    Json(req): Json<SetInstancesRequest>,
) -> impl IntoResponse {
    let (config, _) = match autoscaled_config(&state, &service, &instance) {
        Ok(found) => found,
        Err(resp) => return resp,
    };
    let (desired, status) = clamp_desired_instances(&config, req.desired_instances);
    if let Err(e) = records::set_instances(&state.store, &service, &instance, desired) {
        return internal_error(e);
    }
    info!(job_id = %config.job_id(), desired, requested = req.desired_instances, "instance count overridden");
    ApiResponse::ok(InstancesResponse {
        desired_instances: desired,
        status: Some(status),
    })
    .into_response()
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshots = state.snapshots.read().await;
    (
        [("content-type", "text/plain; version=0.0.4")],
        shoal_metrics::render_prometheus(&snapshots),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_core::{AutoscalingParams, DesiredState};

    fn config() -> ServiceInstanceConfig {
        ServiceInstanceConfig {
            service: "web".to_string(),
            instance: "main".to_string(),
            cluster: "test".to_string(),
            min_instances: 3,
            max_instances: Some(10),
            desired_state: DesiredState::Start,
            deployment: Some("web:1".to_string()),
            cpus: 1.0,
            autoscaling: AutoscalingParams::default(),
        }
    }

    #[test]
    fn clamp_within_range() {
        assert_eq!(clamp_desired_instances(&config(), 5), (5, "SUCCESS".to_string()));
    }

    #[test]
    fn clamp_below_min_warns() {
        let (desired, status) = clamp_desired_instances(&config(), 1);
        assert_eq!(desired, 3);
        assert_eq!(status, "WARNING desired_instances is less than min_instances 3");
    }

    #[test]
    fn clamp_above_max_warns() {
        let (desired, status) = clamp_desired_instances(&config(), 50);
        assert_eq!(desired, 10);
        assert_eq!(status, "WARNING desired_instances is greater than max_instances 10");
    }

    #[test]
    fn expiry_formatting() {
        assert_eq!(format_expiry(0.0), "1970-01-01 00:00:00 UTC");
    }
}
