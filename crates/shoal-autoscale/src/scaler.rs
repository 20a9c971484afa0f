//! Autoscaler: one scaling cycle for one service instance.
//!
//! ```text
//! paused? ─yes─▶ skip
//! lock (bounded wait) ─timeout─▶ skip
//! filter tasks ─no data─▶ skip
//! provider → policy → delta
//! proposed = current + delta
//!   floor at current * (1 - max_downscale_fraction)
//!   clamp to [min, max]
//! incomplete task picture and scaling down ─▶ abort
//! proposed != current ─▶ write instances
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use shoal_core::{
    DecisionPolicyKind, HistoricalLoadRecord, Inventory, ServiceAutoscalingInfo,
    ServiceInstanceConfig,
};
use shoal_metrics::{
    CpuStatsSource, FilteredTasks, MetricsError, MetricsProviders, filter_autoscaling_tasks,
};
use shoal_state::{Coordinator, paths, records};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::forecast::strategy_for;
use crate::history::{load_history, save_history};
use crate::lock::acquire_lock;
use crate::policy::{
    PidState, ProportionalInputs, humanize_error, pid_decision, proportional_decision,
    threshold_decision, utilization_error,
};

/// Safety margins applied to every decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingLimits {
    /// Tolerated relative mismatch between healthy tasks and the expected
    /// instance count before the task picture counts as incomplete.
    pub max_task_delta: f64,
    /// Largest fraction of capacity removed in one cycle.
    pub max_downscale_fraction: f64,
}

impl Default for ScalingLimits {
    fn default() -> Self {
        Self {
            max_task_delta: 0.3,
            max_downscale_fraction: 0.3,
        }
    }
}

/// Why a cycle ended without a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Paused,
    LockTimeout,
    NoData(String),
    Bespoke,
}

/// How one cycle for one instance ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A new instance count was written.
    Applied { from: u32, to: u32 },
    /// The decision matched the current count.
    Unchanged { instances: u32 },
    /// A scale-down was refused because the task picture was incomplete.
    Aborted { current: u32, proposed: u32 },
    Skipped(SkipReason),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied { from, to } => write!(f, "scaled {from} -> {to}"),
            Outcome::Unchanged { instances } => write!(f, "unchanged at {instances}"),
            Outcome::Aborted { current, proposed } => {
                write!(f, "refused scale-down {current} -> {proposed} on incomplete task data")
            }
            Outcome::Skipped(SkipReason::Paused) => write!(f, "skipped: paused"),
            Outcome::Skipped(SkipReason::LockTimeout) => write!(f, "skipped: lock held elsewhere"),
            Outcome::Skipped(SkipReason::NoData(reason)) => write!(f, "skipped: {reason}"),
            Outcome::Skipped(SkipReason::Bespoke) => write!(f, "skipped: bespoke autoscaler"),
        }
    }
}

/// What the provider and policy produced for one instance.
#[derive(Debug, Clone, Copy)]
struct Decision {
    utilization: f64,
    error: f64,
    delta: i64,
}

/// Runs scaling cycles for individual service instances.
pub struct Autoscaler<C, S> {
    providers: MetricsProviders<C, S>,
    limits: ScalingLimits,
    lock_timeout: Duration,
    holder: String,
    acquisitions: AtomicU64,
}

impl<C: Coordinator, S: CpuStatsSource> Autoscaler<C, S> {
    pub fn new(providers: MetricsProviders<C, S>, limits: ScalingLimits, lock_timeout: Duration) -> Self {
        Self {
            providers,
            limits,
            lock_timeout,
            holder: format!("shoal-{}", std::process::id()),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Name this autoscaler's locks are taken under.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn coordinator(&self) -> &C {
        self.providers.coordinator()
    }

    pub fn limits(&self) -> ScalingLimits {
        self.limits
    }

    /// Run one cycle for `config` against this cycle's inventory.
    pub async fn autoscale_instance(
        &self,
        config: &ServiceInstanceConfig,
        inventory: &Inventory,
        now: f64,
    ) -> AutoscaleResult<Outcome> {
        let job_id = config.job_id();
        let (service, instance) = (config.service.as_str(), config.instance.as_str());
        let Some(max_instances) = config.max_instances else {
            return Err(AutoscaleError::NotAutoscaled(job_id));
        };
        if config.is_bespoke() {
            debug!(%job_id, "bespoke autoscaler, skipping");
            return Ok(Outcome::Skipped(SkipReason::Bespoke));
        }

        let coordinator = self.coordinator();
        if records::is_paused(coordinator, now)? {
            info!(%job_id, "autoscaling is paused");
            return Ok(Outcome::Skipped(SkipReason::Paused));
        }

        let holder = self.next_holder();
        let Some(_guard) =
            acquire_lock(coordinator, &paths::lock(service, instance), &holder, self.lock_timeout).await?
        else {
            warn!(%job_id, timeout = ?self.lock_timeout, "another autoscaler holds the lock, skipping");
            return Ok(Outcome::Skipped(SkipReason::LockTimeout));
        };

        let apps = inventory.apps_for(service, instance);
        let tasks = match filter_autoscaling_tasks(&apps, &inventory.cluster_tasks, config) {
            Ok(tasks) => tasks,
            Err(MetricsError::NoData(reason)) => {
                info!(%job_id, %reason, "no tasks to measure, skipping");
                return Ok(Outcome::Skipped(SkipReason::NoData(reason)));
            }
            Err(e) => return Err(e.into()),
        };

        let current = self.current_instances(config, max_instances)?;
        let insufficient =
            is_task_data_insufficient(tasks.healthy_count(), current, self.limits.max_task_delta);

        let decision = match self.decide(config, &tasks, current, max_instances, now, false).await {
            Ok(decision) => decision,
            Err(e) => {
                return match skip_reason(e) {
                    Ok(reason) => {
                        info!(%job_id, ?reason, "no usable metrics, skipping");
                        Ok(Outcome::Skipped(reason))
                    }
                    Err(e) => Err(e),
                };
            }
        };

        let proposed = plan_new_instance_count(
            current,
            decision.delta,
            config.min_instances,
            max_instances,
            self.limits.max_downscale_fraction,
        );

        if insufficient && proposed < current {
            warn!(
                %job_id,
                healthy = tasks.healthy_count(),
                current,
                proposed,
                "not scaling down, too few healthy tasks to trust the reading"
            );
            return Ok(Outcome::Aborted { current, proposed });
        }

        if proposed == current {
            debug!(
                %job_id,
                current,
                utilization = decision.utilization,
                status = %humanize_error(decision.error),
                "no change"
            );
            return Ok(Outcome::Unchanged { instances: current });
        }

        info!(
            %job_id,
            from = current,
            to = proposed,
            utilization = decision.utilization,
            status = %humanize_error(decision.error),
            "scaling"
        );
        records::set_instances(coordinator, service, instance, proposed)?;
        Ok(Outcome::Applied {
            from: current,
            to: proposed,
        })
    }

    /// Dry-run snapshot for dashboards. Nothing is persisted and no lock is
    /// taken; utilization and target are `None` when no reading is possible.
    pub async fn compute_autoscaling_info(
        &self,
        config: &ServiceInstanceConfig,
        inventory: &Inventory,
        now: f64,
    ) -> AutoscaleResult<ServiceAutoscalingInfo> {
        let Some(max_instances) = config.max_instances else {
            return Err(AutoscaleError::NotAutoscaled(config.job_id()));
        };
        let current = self.current_instances(config, max_instances)?;
        let mut info = ServiceAutoscalingInfo {
            service: config.service.clone(),
            instance: config.instance.clone(),
            current_instances: current,
            min_instances: config.min_instances,
            max_instances,
            current_utilization: None,
            target_instances: None,
        };
        if config.is_bespoke() {
            return Ok(info);
        }

        let apps = inventory.apps_for(&config.service, &config.instance);
        let tasks = match filter_autoscaling_tasks(&apps, &inventory.cluster_tasks, config) {
            Ok(tasks) => tasks,
            Err(MetricsError::NoData(_)) => return Ok(info),
            Err(e) => return Err(e.into()),
        };

        match self.decide(config, &tasks, current, max_instances, now, true).await {
            Ok(decision) => {
                info.current_utilization = Some(decision.utilization);
                info.target_instances = Some(plan_new_instance_count(
                    current,
                    decision.delta,
                    config.min_instances,
                    max_instances,
                    self.limits.max_downscale_fraction,
                ));
            }
            Err(e) => {
                skip_reason(e)?;
            }
        }
        Ok(info)
    }

    /// The stored instance count, limited to the configured range. An
    /// instance that was never scaled starts at its maximum.
    pub fn current_instances(&self, config: &ServiceInstanceConfig, max_instances: u32) -> AutoscaleResult<u32> {
        let stored = records::get_instances(self.coordinator(), &config.service, &config.instance)?;
        Ok(config.limit_instance_count(stored.unwrap_or(max_instances)))
    }

    async fn decide(
        &self,
        config: &ServiceInstanceConfig,
        tasks: &FilteredTasks,
        current: u32,
        max_instances: u32,
        now: f64,
        noop: bool,
    ) -> AutoscaleResult<Decision> {
        let params = &config.autoscaling;
        let (service, instance) = (config.service.as_str(), config.instance.as_str());
        let coordinator = self.coordinator();

        let utilization = self.providers.utilization(config, tasks, now, noop).await?;
        let error = utilization_error(utilization, params.setpoint);

        let delta = match params.decision_policy {
            DecisionPolicyKind::Threshold => threshold_decision(error, params.threshold),
            DecisionPolicyKind::Proportional => {
                let strategy = strategy_for(params)?;
                let history = load_history(coordinator, service, instance)?;
                let sample = HistoricalLoadRecord {
                    timestamp: now,
                    load: utilization,
                };
                let (forecast, history) = strategy.forecast(sample, history);
                if !noop {
                    save_history(coordinator, service, instance, &history)?;
                }
                proportional_decision(ProportionalInputs {
                    utilization: forecast,
                    setpoint: params.setpoint,
                    offset: params.offset,
                    current_instances: current,
                    min_instances: config.min_instances,
                    good_enough_window: params.good_enough_window,
                })
            }
            DecisionPolicyKind::Pid => {
                let state = PidState::load(coordinator, service, instance)?;
                let (delta, next) =
                    pid_decision(state, error, now, current, config.min_instances, max_instances);
                if !noop {
                    next.save(coordinator, service, instance)?;
                }
                delta
            }
            DecisionPolicyKind::Bespoke => {
                return Err(MetricsError::Bespoke(config.job_id()).into());
            }
        };

        Ok(Decision {
            utilization,
            error,
            delta,
        })
    }

    fn next_holder(&self) -> String {
        let n = self.acquisitions.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.holder)
    }
}

/// Recoverable metrics outcomes become skips; everything else stays an error.
fn skip_reason(e: AutoscaleError) -> AutoscaleResult<SkipReason> {
    match e {
        AutoscaleError::Metrics(MetricsError::NoData(reason)) => Ok(SkipReason::NoData(reason)),
        AutoscaleError::Metrics(MetricsError::Bespoke(_)) => Ok(SkipReason::Bespoke),
        other => Err(other),
    }
}

/// Whether the healthy task count is too far from the expected instance
/// count to trust for a scale-down.
pub fn is_task_data_insufficient(healthy: usize, current: u32, max_task_delta: f64) -> bool {
    if healthy == 0 {
        return true;
    }
    let current = f64::from(current);
    let lower = (current * (1.0 - max_task_delta)).trunc();
    let upper = (current * (1.0 + max_task_delta)).trunc();
    let healthy = healthy as f64;
    healthy < lower || healthy > upper
}

/// Apply a delta under the downscale guard and the configured bounds.
pub fn plan_new_instance_count(
    current: u32,
    delta: i64,
    min_instances: u32,
    max_instances: u32,
    max_downscale_fraction: f64,
) -> u32 {
    let current_i = i64::from(current);
    let mut proposed = current_i.saturating_add(delta);
    if proposed < current_i {
        let floor = (f64::from(current) * (1.0 - max_downscale_fraction)).floor() as i64;
        proposed = proposed.max(floor);
    }
    let bounded = proposed
        .min(i64::from(max_instances))
        .max(i64::from(min_instances));
    u32::try_from(bounded).unwrap_or(max_instances)
}
