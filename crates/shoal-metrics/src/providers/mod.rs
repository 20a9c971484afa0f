//! Metrics providers, dispatched by [`MetricsProviderKind`].

pub mod http;
pub mod mesos_cpu;

use std::time::Duration;

use tracing::debug;

use shoal_core::{MetricsProviderKind, ServiceInstanceConfig};
use shoal_state::Coordinator;

use crate::error::{MetricsError, MetricsResult};
use crate::filter::FilteredTasks;

use self::mesos_cpu::CpuStatsSource;

/// Default status paths when the instance config names no endpoint.
pub const DEFAULT_HTTP_ENDPOINT: &str = "status";
pub const DEFAULT_UWSGI_ENDPOINT: &str = "status/uwsgi";

/// Bounds for provider network calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HttpSettings {
    /// Per-request timeout for task endpoints.
    pub timeout: Duration,
    /// Per-request timeout for agent statistics.
    pub stats_timeout: Duration,
    /// Maximum requests in flight per provider call.
    pub concurrency: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            stats_timeout: Duration::from_secs(10),
            concurrency: 20,
        }
    }
}

/// Entry point to every metrics provider.
///
/// Holds the coordination store (for the CPU snapshot) and the agent
/// statistics source. Cheap to clone.
#[derive(Clone)]
pub struct MetricsProviders<C, S> {
    coordinator: C,
    stats: S,
    settings: HttpSettings,
}

impl<C: Coordinator, S: CpuStatsSource> MetricsProviders<C, S> {
    pub fn new(coordinator: C, stats: S, settings: HttpSettings) -> Self {
        Self {
            coordinator,
            stats,
            settings,
        }
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    pub fn settings(&self) -> HttpSettings {
        self.settings
    }

    /// Current utilization of a service instance from its configured provider.
    ///
    /// With `noop` set, nothing is written to the coordination store.
    pub async fn utilization(
        &self,
        config: &ServiceInstanceConfig,
        tasks: &FilteredTasks,
        now: f64,
        noop: bool,
    ) -> MetricsResult<f64> {
        let job_id = config.job_id();
        let params = &config.autoscaling;
        debug!(%job_id, provider = ?params.metrics_provider, tasks = tasks.healthy_count(), "computing utilization");

        match params.metrics_provider {
            MetricsProviderKind::MesosCpu => {
                mesos_cpu::cpu_utilization(
                    &self.coordinator,
                    &self.stats,
                    config,
                    tasks,
                    &self.settings,
                    now,
                    noop,
                )
                .await
            }
            MetricsProviderKind::Http => {
                let endpoint = params.endpoint.as_deref().unwrap_or(DEFAULT_HTTP_ENDPOINT);
                http::endpoint_utilization(
                    &job_id,
                    tasks,
                    endpoint,
                    &self.settings,
                    http::parse_http_utilization,
                )
                .await
            }
            MetricsProviderKind::Uwsgi => {
                let endpoint = params.endpoint.as_deref().unwrap_or(DEFAULT_UWSGI_ENDPOINT);
                http::endpoint_utilization(
                    &job_id,
                    tasks,
                    endpoint,
                    &self.settings,
                    http::parse_uwsgi_utilization,
                )
                .await
            }
            MetricsProviderKind::Bespoke => Err(MetricsError::Bespoke(job_id)),
        }
    }
}
