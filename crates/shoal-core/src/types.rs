//! Domain types for Shoal.
//!
//! These types describe service instance configuration, the task inventory
//! reported by the cluster manager, and the read-only autoscaling snapshot
//! exposed to operators. All types are serializable so they can travel over
//! the inventory API and the operator API unchanged.

use serde::{Deserialize, Serialize};

/// Name of a service (e.g. `web`).
pub type ServiceName = String;

/// Name of an instance within a service (e.g. `main`, `canary`).
pub type InstanceName = String;

/// Unique identifier of a running task.
pub type TaskId = String;

// ── Autoscaling parameters ─────────────────────────────────────────

/// Where utilization readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricsProviderKind {
    /// CPU accounting from the cluster agents.
    #[default]
    MesosCpu,
    /// JSON `{"utilization": f}` from an HTTP endpoint on each task.
    Http,
    /// uWSGI worker status JSON from each task.
    Uwsgi,
    /// Scaling is controlled by something outside Shoal.
    Bespoke,
}

/// How a utilization reading is turned into an instance-count delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPolicyKind {
    Threshold,
    #[default]
    Proportional,
    Pid,
    /// Scaling is controlled by something outside Shoal.
    Bespoke,
}

/// How the proportional policy derives the utilization it acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForecastPolicyKind {
    #[default]
    Current,
    MovingAverage,
}

/// Whether the operator wants the instance running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    #[default]
    Start,
    Stop,
}

/// Provider and policy parameters for one service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingParams {
    #[serde(default)]
    pub metrics_provider: MetricsProviderKind,
    #[serde(default)]
    pub decision_policy: DecisionPolicyKind,
    /// Target utilization fraction.
    #[serde(default = "default_setpoint")]
    pub setpoint: f64,
    /// Baseline utilization of an idle task.
    #[serde(default)]
    pub offset: f64,
    /// Error magnitude the threshold policy tolerates.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// `(low, high)` utilization range in which the proportional policy holds.
    #[serde(default)]
    pub good_enough_window: Option<(f64, f64)>,
    #[serde(default)]
    pub forecast_policy: ForecastPolicyKind,
    /// Look-back for the moving-average forecast (e.g. "30m").
    #[serde(default = "default_moving_average_window")]
    pub moving_average_window: String,
    /// HTTP path queried by the http and uwsgi providers.
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_setpoint() -> f64 {
    0.8
}

fn default_threshold() -> f64 {
    0.1
}

fn default_moving_average_window() -> String {
    "30m".to_string()
}

impl Default for AutoscalingParams {
    fn default() -> Self {
        Self {
            metrics_provider: MetricsProviderKind::default(),
            decision_policy: DecisionPolicyKind::default(),
            setpoint: default_setpoint(),
            offset: 0.0,
            threshold: default_threshold(),
            good_enough_window: None,
            forecast_policy: ForecastPolicyKind::default(),
            moving_average_window: default_moving_average_window(),
            endpoint: None,
        }
    }
}

// ── Service instance config ────────────────────────────────────────

/// Configuration of one service instance, as loaded for the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstanceConfig {
    pub service: ServiceName,
    pub instance: InstanceName,
    pub cluster: String,
    pub min_instances: u32,
    /// `None` means autoscaling is disabled for this instance.
    pub max_instances: Option<u32>,
    pub desired_state: DesiredState,
    /// Deployed artifact reference.
    pub deployment: Option<String>,
    /// CPU share reserved per task.
    pub cpus: f64,
    pub autoscaling: AutoscalingParams,
}

impl ServiceInstanceConfig {
    /// `service.instance`, the identifier used in logs and app ids.
    pub fn job_id(&self) -> String {
        format!("{}.{}", self.service, self.instance)
    }

    /// Whether the autoscaler should consider this instance at all.
    pub fn is_autoscaled(&self) -> bool {
        self.max_instances.is_some() && self.desired_state == DesiredState::Start
    }

    /// Whether scaling is delegated to an external controller.
    pub fn is_bespoke(&self) -> bool {
        self.autoscaling.decision_policy == DecisionPolicyKind::Bespoke
            || self.autoscaling.metrics_provider == MetricsProviderKind::Bespoke
    }

    /// Clamp an instance count to `[min_instances, max_instances]`.
    pub fn limit_instance_count(&self, instances: u32) -> u32 {
        let capped = match self.max_instances {
            Some(max) => instances.min(max),
            None => instances,
        };
        capped.max(self.min_instances)
    }
}

// ── Task inventory ─────────────────────────────────────────────────

/// A single health-check result reported by the cluster manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub alive: bool,
    /// Unix timestamp of the check.
    #[serde(default)]
    pub checked_at: u64,
}

/// A health check declared by an application version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckDefinition {
    /// "http", "tcp", "command".
    pub protocol: String,
    #[serde(default)]
    pub path: Option<String>,
}

/// A running task belonging to one application version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub app_id: String,
    pub host: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Oldest first.
    #[serde(default)]
    pub health_check_results: Vec<HealthCheckResult>,
}

impl TaskSnapshot {
    /// `host:port` of the task's first port.
    pub fn address(&self) -> Option<String> {
        self.ports.first().map(|port| format!("{}:{port}", self.host))
    }

    /// Whether the most recent health-check result reports alive.
    pub fn is_healthy(&self) -> bool {
        self.health_check_results
            .last()
            .is_some_and(|result| result.alive)
    }
}

/// One application version of a service instance. Several versions
/// coexist while a bounce is in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppVersion {
    pub id: String,
    pub service: ServiceName,
    pub instance: InstanceName,
    /// Monotonic version stamp; the highest one present is current.
    pub version: u64,
    #[serde(default)]
    pub health_checks: Vec<HealthCheckDefinition>,
    #[serde(default)]
    pub tasks: Vec<TaskSnapshot>,
}

/// A cluster-level task descriptor used for resource accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTask {
    pub id: TaskId,
    /// `host:port` of the agent running the task.
    pub agent: String,
}

/// Everything the cluster manager reports for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub apps: Vec<AppVersion>,
    pub cluster_tasks: Vec<ClusterTask>,
}

impl Inventory {
    /// All application versions of one service instance.
    pub fn apps_for(&self, service: &str, instance: &str) -> Vec<AppVersion> {
        self.apps
            .iter()
            .filter(|app| app.service == service && app.instance == instance)
            .cloned()
            .collect()
    }
}

// ── Historical load ────────────────────────────────────────────────

/// One sample of the historical load series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalLoadRecord {
    /// Unix timestamp (seconds, fractional).
    pub timestamp: f64,
    pub load: f64,
}

// ── Observability ──────────────────────────────────────────────────

/// Read-only autoscaling snapshot for dashboards. Utilization and target
/// are `None` when no metrics could be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAutoscalingInfo {
    pub service: ServiceName,
    pub instance: InstanceName,
    pub current_instances: u32,
    pub min_instances: u32,
    pub max_instances: u32,
    pub current_utilization: Option<f64>,
    pub target_instances: Option<u32>,
}

impl ServiceAutoscalingInfo {
    /// Utilization as a percentage string, or "unavailable".
    pub fn utilization_display(&self) -> String {
        match self.current_utilization {
            Some(u) => format!("{:.1}%", u * 100.0),
            None => "unavailable".to_string(),
        }
    }

    /// Target instance count, or "unavailable".
    pub fn target_display(&self) -> String {
        match self.target_instances {
            Some(t) => t.to_string(),
            None => "unavailable".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServiceInstanceConfig {
        ServiceInstanceConfig {
            service: "web".to_string(),
            instance: "main".to_string(),
            cluster: "test".to_string(),
            min_instances: 5,
            max_instances: Some(10),
            desired_state: DesiredState::Start,
            deployment: Some("registry/web:abc".to_string()),
            cpus: 1.0,
            autoscaling: AutoscalingParams::default(),
        }
    }

    fn task(results: &[bool]) -> TaskSnapshot {
        TaskSnapshot {
            id: "web.main.1".to_string(),
            app_id: "web.main.v1".to_string(),
            host: "10.0.0.1".to_string(),
            ports: vec![31000, 31001],
            health_check_results: results
                .iter()
                .map(|alive| HealthCheckResult {
                    alive: *alive,
                    checked_at: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn limit_instance_count_clamps_both_ends() {
        let config = test_config();
        assert_eq!(config.limit_instance_count(2), 5);
        assert_eq!(config.limit_instance_count(7), 7);
        assert_eq!(config.limit_instance_count(40), 10);
    }

    #[test]
    fn autoscaled_requires_max_and_start() {
        let mut config = test_config();
        assert!(config.is_autoscaled());

        config.desired_state = DesiredState::Stop;
        assert!(!config.is_autoscaled());

        config.desired_state = DesiredState::Start;
        config.max_instances = None;
        assert!(!config.is_autoscaled());
    }

    #[test]
    fn bespoke_on_either_axis() {
        let mut config = test_config();
        assert!(!config.is_bespoke());
        config.autoscaling.metrics_provider = MetricsProviderKind::Bespoke;
        assert!(config.is_bespoke());
    }

    #[test]
    fn task_health_uses_latest_result() {
        assert!(task(&[false, true]).is_healthy());
        assert!(!task(&[true, false]).is_healthy());
        assert!(!task(&[]).is_healthy());
    }

    #[test]
    fn task_address_uses_first_port() {
        assert_eq!(task(&[]).address().as_deref(), Some("10.0.0.1:31000"));
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let params: AutoscalingParams =
            serde_json::from_str(r#"{"metrics_provider": "uwsgi", "good_enough_window": [0.4, 0.6]}"#)
                .unwrap();
        assert_eq!(params.metrics_provider, MetricsProviderKind::Uwsgi);
        assert_eq!(params.decision_policy, DecisionPolicyKind::Proportional);
        assert_eq!(params.setpoint, 0.8);
        assert_eq!(params.good_enough_window, Some((0.4, 0.6)));
    }

    #[test]
    fn info_display_unavailable() {
        let info = ServiceAutoscalingInfo {
            service: "web".to_string(),
            instance: "main".to_string(),
            current_instances: 3,
            min_instances: 1,
            max_instances: 5,
            current_utilization: None,
            target_instances: None,
        };
        assert_eq!(info.utilization_display(), "unavailable");
        assert_eq!(info.target_display(), "unavailable");
    }
}
