//! CPU utilization from agent resource accounting.
//!
//! Each cycle reads cumulative CPU seconds for every healthy task and
//! compares them with the previous cycle's snapshot, which lives in the
//! coordination store as `seconds:task_id` pairs joined by commas next to
//! the timestamp it was taken at.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use shoal_core::{ClusterTask, ServiceInstanceConfig, TaskId};
use shoal_state::{Coordinator, paths};

use crate::error::{MetricsError, MetricsResult};
use crate::filter::FilteredTasks;
use crate::http::fetch_json;

use super::HttpSettings;

/// CPU share reserved for executor overhead outside the task's limit.
pub const CPU_LIMIT_EPSILON: f64 = 0.1;

/// Cumulative CPU accounting for one task.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpus_user_time_secs: f64,
    #[serde(default)]
    pub cpus_system_time_secs: f64,
    pub cpus_limit: f64,
}

impl CpuStats {
    pub fn cpu_seconds(&self) -> f64 {
        self.cpus_user_time_secs + self.cpus_system_time_secs
    }
}

/// Where per-task CPU accounting comes from.
pub trait CpuStatsSource: Clone + Send + Sync + 'static {
    /// Statistics for one task, or `None` when the agent can't be read.
    fn task_stats(&self, task: &ClusterTask) -> impl Future<Output = Option<CpuStats>> + Send;
}

/// Reads `/monitor/statistics` from the agent running each task.
#[derive(Debug, Clone)]
pub struct AgentStatsClient {
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ExecutorStatistics {
    executor_id: String,
    statistics: CpuStats,
}

impl AgentStatsClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CpuStatsSource for AgentStatsClient {
    async fn task_stats(&self, task: &ClusterTask) -> Option<CpuStats> {
        let executors: Vec<ExecutorStatistics> =
            match fetch_json(&task.agent, "monitor/statistics", self.timeout).await {
                Ok(executors) => executors,
                Err(e) => {
                    debug!(agent = %task.agent, task_id = %task.id, error = %e, "agent statistics unavailable");
                    return None;
                }
            };
        executors
            .into_iter()
            .find(|executor| executor.executor_id == task.id)
            .map(|executor| executor.statistics)
    }
}

/// Mean CPU utilization of the healthy tasks since the previous snapshot.
pub(crate) async fn cpu_utilization<C: Coordinator, S: CpuStatsSource>(
    coordinator: &C,
    source: &S,
    config: &ServiceInstanceConfig,
    tasks: &FilteredTasks,
    settings: &HttpSettings,
    now: f64,
    noop: bool,
) -> MetricsResult<f64> {
    let job_id = config.job_id();
    let (service, instance) = (config.service.as_str(), config.instance.as_str());

    let last_time = read_last_time(coordinator, service, instance)?;
    let previous = match coordinator.get(&paths::cpu_data(service, instance))? {
        Some(raw) => parse_cpu_data(&String::from_utf8_lossy(&raw)),
        None => BTreeMap::new(),
    };

    let samples = collect_samples(source, tasks, settings).await;

    if !noop {
        let snapshot = format_cpu_data(tasks.healthy.keys(), &samples);
        coordinator.set(&paths::cpu_data(service, instance), snapshot.as_bytes())?;
        coordinator.set(
            &paths::cpu_last_time(service, instance),
            format!("{now}").as_bytes(),
        )?;
    }

    let Some(last_time) = last_time else {
        info!(%job_id, "no previous cpu snapshot, waiting for the next cycle");
        return Err(MetricsError::NoData(format!(
            "no previous cpu sample for {job_id}"
        )));
    };
    let elapsed = now - last_time;
    if elapsed <= 0.0 {
        return Err(MetricsError::NoData(format!(
            "no time elapsed since the last cpu sample for {job_id}"
        )));
    }

    let mut fractions = Vec::new();
    for (task_id, stats) in &samples {
        let Some(previous_seconds) = previous.get(task_id) else {
            debug!(%job_id, %task_id, "task missing from previous snapshot");
            continue;
        };
        let usable_limit = stats.cpus_limit - CPU_LIMIT_EPSILON;
        if usable_limit <= 0.0 {
            warn!(%job_id, %task_id, cpus_limit = stats.cpus_limit, "cpu limit too small to measure");
            continue;
        }
        fractions.push((stats.cpu_seconds() - previous_seconds) / (elapsed * usable_limit));
    }

    if fractions.is_empty() {
        return Err(MetricsError::NoData(format!(
            "couldn't get any cpu data for {job_id}"
        )));
    }
    Ok(fractions.iter().sum::<f64>() / fractions.len() as f64)
}

fn read_last_time<C: Coordinator>(
    coordinator: &C,
    service: &str,
    instance: &str,
) -> MetricsResult<Option<f64>> {
    let Some(raw) = coordinator.get(&paths::cpu_last_time(service, instance))? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&raw);
    Ok(text.trim().parse::<f64>().ok().filter(|t| t.is_finite()))
}

/// Fetch statistics for every healthy task that the cluster inventory
/// places on an agent.
async fn collect_samples<S: CpuStatsSource>(
    source: &S,
    tasks: &FilteredTasks,
    settings: &HttpSettings,
) -> BTreeMap<TaskId, CpuStats> {
    let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut set = JoinSet::new();

    for cluster_task in &tasks.cluster_tasks {
        if !tasks.healthy.contains_key(&cluster_task.id) {
            continue;
        }
        let source = source.clone();
        let permits = permits.clone();
        let task = cluster_task.clone();
        let timeout = settings.stats_timeout;
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let stats = tokio::time::timeout(timeout, source.task_stats(&task))
                .await
                .ok()
                .flatten();
            (task.id, stats)
        });
    }

    let mut samples = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        if let Ok((task_id, Some(stats))) = joined {
            samples.insert(task_id, stats);
        }
    }
    samples
}

/// Parse `seconds:task_id,...`, skipping entries that don't parse.
pub fn parse_cpu_data(raw: &str) -> BTreeMap<TaskId, f64> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let (seconds, task_id) = entry.trim().split_once(':')?;
            let seconds = seconds.parse::<f64>().ok()?;
            Some((task_id.to_string(), seconds))
        })
        .collect()
}

/// Render the snapshot for `task_ids`. Tasks without a sample get a zero
/// baseline.
pub fn format_cpu_data<'a>(
    task_ids: impl Iterator<Item = &'a TaskId>,
    samples: &BTreeMap<TaskId, CpuStats>,
) -> String {
    task_ids
        .map(|task_id| {
            let seconds = samples.get(task_id).map_or(0.0, CpuStats::cpu_seconds);
            format!("{seconds}:{task_id}")
        })
        .collect::<Vec<_>>()
        .join(",")
}
