//! Scale-out loop: one autoscaling cycle across every configured instance.
//!
//! Configs are loaded fresh each cycle and the task inventory is fetched
//! once and shared. Instances are evaluated concurrently, bounded by the
//! worker count; a failure in one instance is logged and recorded without
//! touching the others.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use shoal_core::{ConfigError, ConfigSource, ServiceAutoscalingInfo, ServiceInstanceConfig};
use shoal_metrics::CpuStatsSource;
use shoal_state::{Coordinator, records};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::inventory::TaskInventory;
use crate::scaler::{Autoscaler, Outcome};

/// What one scale-out cycle did, keyed by `service.instance`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// The pause switch was on; nothing was evaluated.
    pub paused: bool,
    pub outcomes: BTreeMap<String, Outcome>,
    /// Instances whose config or cycle failed, with the error text.
    pub failures: BTreeMap<String, String>,
    pub not_deployed: Vec<String>,
}

/// Drives [`Autoscaler`] over the whole fleet.
pub struct ScaleOutLoop<C, S, I, F> {
    autoscaler: Arc<Autoscaler<C, S>>,
    inventory: I,
    configs: F,
    workers: usize,
}

impl<C, S, I, F> ScaleOutLoop<C, S, I, F>
where
    C: Coordinator,
    S: CpuStatsSource,
    I: TaskInventory,
    F: ConfigSource,
{
    pub fn new(autoscaler: Arc<Autoscaler<C, S>>, inventory: I, configs: F, workers: usize) -> Self {
        Self {
            autoscaler,
            inventory,
            configs,
            workers: workers.max(1),
        }
    }

    pub fn autoscaler(&self) -> &Arc<Autoscaler<C, S>> {
        &self.autoscaler
    }

    /// Run one cycle for `services`, or for every service when empty.
    ///
    /// Fails when the pause switch can't be read, when configs or the
    /// inventory can't be listed, or when every evaluated instance failed
    /// to reach the coordination store.
    pub async fn autoscale_services(&self, services: &[String], now: f64) -> AutoscaleResult<CycleReport> {
        let mut report = CycleReport::default();

        if records::is_paused(self.autoscaler.coordinator(), now)? {
            info!("autoscaling is paused, skipping cycle");
            report.paused = true;
            return Ok(report);
        }

        let configs = self.load_configs(services, &mut report)?;
        if configs.is_empty() {
            debug!("no autoscaled instances to evaluate");
            return Ok(report);
        }

        let inventory = Arc::new(self.inventory.fetch().await?);
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();
        let mut job_ids = HashMap::new();

        for config in configs {
            let autoscaler = self.autoscaler.clone();
            let inventory = inventory.clone();
            let permits = permits.clone();
            let job_id = config.job_id();
            let handle = set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = autoscaler.autoscale_instance(&config, &inventory, now).await;
                (config.job_id(), result)
            });
            job_ids.insert(handle.id(), job_id);
        }

        let mut evaluated = 0usize;
        let mut store_failures = 0usize;
        while let Some(joined) = set.join_next().await {
            evaluated += 1;
            match joined {
                Ok((job_id, Ok(outcome))) => {
                    debug!(%job_id, %outcome, "instance evaluated");
                    report.outcomes.insert(job_id, outcome);
                }
                Ok((job_id, Err(e))) => {
                    warn!(%job_id, error = %e, "autoscaling failed for instance");
                    if e.is_store_failure() {
                        store_failures += 1;
                    }
                    report.failures.insert(job_id, e.to_string());
                }
                Err(e) => {
                    let job_id = job_ids
                        .remove(&e.id())
                        .unwrap_or_else(|| "unknown".to_string());
                    error!(%job_id, error = %e, "autoscaling task panicked");
                    report.failures.insert(job_id, format!("evaluation panicked: {e}"));
                }
            }
        }

        if store_failures > 0 && store_failures == evaluated {
            return Err(AutoscaleError::StoreUnavailable(store_failures));
        }

        info!(
            evaluated,
            failed = report.failures.len(),
            applied = report
                .outcomes
                .values()
                .filter(|o| matches!(o, Outcome::Applied { .. }))
                .count(),
            "scale-out cycle complete"
        );
        Ok(report)
    }

    /// Dry-run autoscaling snapshots for `services` (all when empty).
    /// Instances whose snapshot fails are logged and left out.
    pub async fn autoscaling_infos(
        &self,
        services: &[String],
        now: f64,
    ) -> AutoscaleResult<Vec<ServiceAutoscalingInfo>> {
        let mut scratch = CycleReport::default();
        let configs = self.load_configs(services, &mut scratch)?;
        if configs.is_empty() {
            return Ok(Vec::new());
        }

        let inventory = self.inventory.fetch().await?;
        let mut infos = Vec::with_capacity(configs.len());
        for config in &configs {
            match self.autoscaler.compute_autoscaling_info(config, &inventory, now).await {
                Ok(info) => infos.push(info),
                Err(e) => warn!(job_id = %config.job_id(), error = %e, "no autoscaling info"),
            }
        }
        Ok(infos)
    }

    /// Load every instance worth evaluating. Undeployed, disabled and
    /// bespoke instances are left out.
    fn load_configs(
        &self,
        services: &[String],
        report: &mut CycleReport,
    ) -> AutoscaleResult<Vec<ServiceInstanceConfig>> {
        let mut configs = Vec::new();
        for (service, instance) in self.configs.list_instances()? {
            if !services.is_empty() && !services.contains(&service) {
                continue;
            }
            let job_id = format!("{service}.{instance}");
            match self.configs.load(&service, &instance) {
                Ok(config) if !config.is_autoscaled() => {
                    debug!(%job_id, "autoscaling disabled");
                }
                Ok(config) if config.is_bespoke() => {
                    debug!(%job_id, "bespoke autoscaler, skipping");
                }
                Ok(config) => configs.push(config),
                Err(ConfigError::NotDeployed { .. }) => {
                    debug!(%job_id, "not deployed yet");
                    report.not_deployed.push(job_id);
                }
                Err(e) => {
                    warn!(%job_id, error = %e, "skipping instance with unusable config");
                    report.failures.insert(job_id, e.to_string());
                }
            }
        }
        Ok(configs)
    }

    /// Run cycles every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "scale-out loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.autoscale_services(&[], epoch_secs_f64()).await {
                        error!(error = %e, "scale-out cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("scale-out loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Current Unix time in fractional seconds.
pub fn epoch_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
