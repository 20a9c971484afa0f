//! System and per-service configuration.
//!
//! The system config (`system.toml`) names the cluster, the SOA directory
//! and the state store, and carries the autoscaler's tunables. Service
//! configs live at `{soa_dir}/{service}/{cluster}.toml`, one table per
//! instance:
//!
//! ```toml
//! [main]
//! min_instances = 3
//! max_instances = 30
//! deployment = "registry/web:4f1c2a"
//!
//! [main.autoscaling]
//! metrics_provider = "http"
//! endpoint = "status"
//! setpoint = 0.6
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{
    AutoscalingParams, DesiredState, InstanceName, ServiceInstanceConfig, ServiceName,
};

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("no configuration for {service}.{instance}")]
    NotFound { service: String, instance: String },

    #[error("{service}.{instance} is not deployed yet")]
    NotDeployed { service: String, instance: String },

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid config for {job_id}: {reason}")]
    Invalid { job_id: String, reason: String },
}

// ── System config ──────────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub cluster: String,
    pub soa_dir: PathBuf,
    pub state_path: PathBuf,
    #[serde(default)]
    pub inventory: InventorySettings,
    #[serde(default)]
    pub autoscaler: AutoscalerSettings,
}

/// Where the cluster manager's task inventory is served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySettings {
    /// `host:port` of the inventory API.
    #[serde(default = "default_inventory_address")]
    pub address: String,
    #[serde(default = "default_inventory_timeout")]
    pub timeout: String,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            address: default_inventory_address(),
            timeout: default_inventory_timeout(),
        }
    }
}

impl InventorySettings {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(10))
    }
}

fn default_inventory_address() -> String {
    "127.0.0.1:5052".to_string()
}

fn default_inventory_timeout() -> String {
    "10s".to_string()
}

/// Autoscaler tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerSettings {
    /// Time between scale-out cycles in `run` mode.
    pub interval: String,
    /// Maximum wait for a per-instance lock.
    pub lock_timeout: String,
    /// How long a held lock stays valid if its holder disappears.
    pub lock_lease: String,
    /// Per-request timeout for task HTTP endpoints.
    pub http_timeout: String,
    /// Per-request timeout for agent CPU statistics.
    pub stats_timeout: String,
    /// Concurrent HTTP requests per service instance.
    pub http_concurrency: usize,
    /// Service instances evaluated concurrently.
    pub workers: usize,
    /// Tolerated relative mismatch between healthy tasks and expected instances.
    pub max_task_delta: f64,
    /// Largest fraction of capacity removed in one cycle.
    pub max_downscale_fraction: f64,
}

impl Default for AutoscalerSettings {
    fn default() -> Self {
        Self {
            interval: "300s".to_string(),
            lock_timeout: "1s".to_string(),
            lock_lease: "5m".to_string(),
            http_timeout: "2s".to_string(),
            stats_timeout: "10s".to_string(),
            http_concurrency: 20,
            workers: 8,
            max_task_delta: 0.3,
            max_downscale_fraction: 0.3,
        }
    }
}

impl AutoscalerSettings {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(300))
    }

    pub fn lock_timeout(&self) -> Duration {
        parse_duration(&self.lock_timeout).unwrap_or(Duration::from_secs(1))
    }

    pub fn lock_lease(&self) -> Duration {
        parse_duration(&self.lock_lease).unwrap_or(Duration::from_secs(300))
    }

    pub fn http_timeout(&self) -> Duration {
        parse_duration(&self.http_timeout).unwrap_or(Duration::from_secs(2))
    }

    pub fn stats_timeout(&self) -> Duration {
        parse_duration(&self.stats_timeout).unwrap_or(Duration::from_secs(10))
    }

    fn validate(&self) -> ConfigResult<()> {
        for value in [
            &self.interval,
            &self.lock_timeout,
            &self.lock_lease,
            &self.http_timeout,
            &self.stats_timeout,
        ] {
            if parse_duration(value).is_none() {
                return Err(ConfigError::InvalidDuration(value.clone()));
            }
        }
        let fractions = [self.max_task_delta, self.max_downscale_fraction];
        if fractions.iter().any(|f| !(0.0..1.0).contains(f)) {
            return Err(ConfigError::Invalid {
                job_id: "autoscaler".to_string(),
                reason: "max_task_delta and max_downscale_fraction must be in [0, 1)".to_string(),
            });
        }
        if self.workers == 0 || self.http_concurrency == 0 {
            return Err(ConfigError::Invalid {
                job_id: "autoscaler".to_string(),
                reason: "workers and http_concurrency must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl SystemConfig {
    /// Load and validate a system config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = read(path)?;
        let config: SystemConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.autoscaler.validate()?;
        if parse_duration(&config.inventory.timeout).is_none() {
            return Err(ConfigError::InvalidDuration(config.inventory.timeout.clone()));
        }
        debug!(?path, cluster = %config.cluster, "system config loaded");
        Ok(config)
    }
}

// ── Service configs ────────────────────────────────────────────────

/// Source of per-instance configuration. Called fresh every cycle.
pub trait ConfigSource: Send + Sync {
    /// All `(service, instance)` pairs configured for this cluster.
    fn list_instances(&self) -> ConfigResult<Vec<(ServiceName, InstanceName)>>;

    /// Load one instance's config. Fails with `NotDeployed` when no
    /// artifact has been deployed yet.
    fn load(&self, service: &str, instance: &str) -> ConfigResult<ServiceInstanceConfig>;
}

/// File-backed config source rooted at the SOA directory.
#[derive(Debug, Clone)]
pub struct SoaDir {
    root: PathBuf,
    cluster: String,
}

/// One instance table inside `{cluster}.toml`.
#[derive(Debug, Clone, Deserialize)]
struct InstanceSection {
    #[serde(default = "default_min_instances")]
    min_instances: u32,
    #[serde(default)]
    max_instances: Option<u32>,
    #[serde(default)]
    desired_state: DesiredState,
    #[serde(default)]
    deployment: Option<String>,
    #[serde(default = "default_cpus")]
    cpus: f64,
    #[serde(default)]
    autoscaling: AutoscalingParams,
}

fn default_min_instances() -> u32 {
    1
}

fn default_cpus() -> f64 {
    0.25
}

impl SoaDir {
    pub fn new(root: impl Into<PathBuf>, cluster: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            cluster: cluster.into(),
        }
    }

    fn service_file(&self, service: &str) -> PathBuf {
        self.root.join(service).join(format!("{}.toml", self.cluster))
    }

    fn read_service(&self, service: &str) -> ConfigResult<BTreeMap<String, InstanceSection>> {
        let path = self.service_file(service);
        let content = read(&path)?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }
}

impl ConfigSource for SoaDir {
    fn list_instances(&self) -> ConfigResult<Vec<(ServiceName, InstanceName)>> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| ConfigError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut services: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|service| self.service_file(service).is_file())
            .collect();
        services.sort();

        let mut pairs = Vec::new();
        for service in services {
            for instance in self.read_service(&service)?.into_keys() {
                pairs.push((service.clone(), instance));
            }
        }
        Ok(pairs)
    }

    fn load(&self, service: &str, instance: &str) -> ConfigResult<ServiceInstanceConfig> {
        let mut sections = self.read_service(service)?;
        let section = sections
            .remove(instance)
            .ok_or_else(|| ConfigError::NotFound {
                service: service.to_string(),
                instance: instance.to_string(),
            })?;

        if section.deployment.is_none() {
            return Err(ConfigError::NotDeployed {
                service: service.to_string(),
                instance: instance.to_string(),
            });
        }

        let config = ServiceInstanceConfig {
            service: service.to_string(),
            instance: instance.to_string(),
            cluster: self.cluster.clone(),
            min_instances: section.min_instances,
            max_instances: section.max_instances,
            desired_state: section.desired_state,
            deployment: section.deployment,
            cpus: section.cpus,
            autoscaling: section.autoscaling,
        };
        validate_instance(&config)?;
        Ok(config)
    }
}

/// Reject configs the decision policies cannot act on.
fn validate_instance(config: &ServiceInstanceConfig) -> ConfigResult<()> {
    let invalid = |reason: &str| ConfigError::Invalid {
        job_id: config.job_id(),
        reason: reason.to_string(),
    };
    let params = &config.autoscaling;

    if let Some(max) = config.max_instances
        && max < config.min_instances
    {
        return Err(invalid("max_instances is below min_instances"));
    }
    if !(params.setpoint > 0.0 && params.setpoint < 1.0) {
        return Err(invalid("setpoint must be in (0, 1)"));
    }
    if params.offset >= params.setpoint {
        return Err(invalid("offset must be below setpoint"));
    }
    if let Some((low, high)) = params.good_enough_window
        && low > high
    {
        return Err(invalid("good_enough_window low is above high"));
    }
    if parse_duration(&params.moving_average_window).is_none() {
        return Err(ConfigError::InvalidDuration(params.moving_average_window.clone()));
    }
    Ok(())
}

fn read(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecisionPolicyKind, ForecastPolicyKind, MetricsProviderKind};

    const WEB_TOML: &str = r#"
[main]
min_instances = 3
max_instances = 30
deployment = "registry/web:4f1c2a"

[main.autoscaling]
metrics_provider = "http"
endpoint = "status"
setpoint = 0.6
good_enough_window = [0.55, 0.65]
forecast_policy = "moving_average"

[canary]
deployment = "registry/web:4f1c2a"

[batch]
max_instances = 5
"#;

    fn soa_dir() -> (tempfile::TempDir, SoaDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("web")).unwrap();
        std::fs::write(dir.path().join("web/norcal.toml"), WEB_TOML).unwrap();
        std::fs::create_dir_all(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/othercluster.toml"), "[main]\n").unwrap();
        let source = SoaDir::new(dir.path(), "norcal");
        (dir, source)
    }

    #[test]
    fn list_instances_for_cluster() {
        let (_dir, source) = soa_dir();
        let pairs = source.list_instances().unwrap();
        assert_eq!(
            pairs,
            vec![
                ("web".to_string(), "batch".to_string()),
                ("web".to_string(), "canary".to_string()),
                ("web".to_string(), "main".to_string()),
            ]
        );
    }

    #[test]
    fn load_full_instance() {
        let (_dir, source) = soa_dir();
        let config = source.load("web", "main").unwrap();
        assert_eq!(config.min_instances, 3);
        assert_eq!(config.max_instances, Some(30));
        assert_eq!(config.cluster, "norcal");
        assert_eq!(config.autoscaling.metrics_provider, MetricsProviderKind::Http);
        assert_eq!(config.autoscaling.decision_policy, DecisionPolicyKind::Proportional);
        assert_eq!(config.autoscaling.forecast_policy, ForecastPolicyKind::MovingAverage);
        assert_eq!(config.autoscaling.good_enough_window, Some((0.55, 0.65)));
        assert!(config.is_autoscaled());
    }

    #[test]
    fn load_defaults_disable_autoscaling() {
        let (_dir, source) = soa_dir();
        let config = source.load("web", "canary").unwrap();
        assert_eq!(config.min_instances, 1);
        assert_eq!(config.max_instances, None);
        assert!(!config.is_autoscaled());
    }

    #[test]
    fn load_undeployed_instance() {
        let (_dir, source) = soa_dir();
        let err = source.load("web", "batch").unwrap_err();
        assert!(matches!(err, ConfigError::NotDeployed { .. }));
    }

    #[test]
    fn load_missing_instance() {
        let (_dir, source) = soa_dir();
        let err = source.load("web", "nope").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn load_rejects_offset_above_setpoint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("web")).unwrap();
        std::fs::write(
            dir.path().join("web/norcal.toml"),
            "[main]\nmax_instances = 4\ndeployment = \"x\"\n[main.autoscaling]\nsetpoint = 0.5\noffset = 0.6\n",
        )
        .unwrap();
        let err = SoaDir::new(dir.path(), "norcal").load("web", "main").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn system_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.toml");
        std::fs::write(
            &path,
            "cluster = \"norcal\"\nsoa_dir = \"/nail/etc/services\"\nstate_path = \"/var/lib/shoal/state.redb\"\n",
        )
        .unwrap();

        let config = SystemConfig::from_file(&path).unwrap();
        assert_eq!(config.cluster, "norcal");
        assert_eq!(config.autoscaler.max_task_delta, 0.3);
        assert_eq!(config.autoscaler.max_downscale_fraction, 0.3);
        assert_eq!(config.autoscaler.lock_timeout(), Duration::from_secs(1));
        assert_eq!(config.autoscaler.interval(), Duration::from_secs(300));
        assert_eq!(config.inventory.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn system_config_rejects_bad_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.toml");
        std::fs::write(
            &path,
            "cluster = \"c\"\nsoa_dir = \"/x\"\nstate_path = \"/y\"\n[autoscaler]\nlock_timeout = \"soon\"\n",
        )
        .unwrap();
        assert!(matches!(
            SystemConfig::from_file(&path),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }
}
