//! Selects which tasks of a service instance get measured.
//!
//! During a bounce several application versions run side by side. A task
//! counts as healthy when:
//!
//! - its application version defines no health checks, or
//! - its most recent health-check result is alive, or
//! - it belongs to a superseded version and has never been health
//!   checked (the cluster manager stops checking old versions early;
//!   treating those as unhealthy would read as a capacity drop).

use std::collections::BTreeMap;

use tracing::{debug, info};

use shoal_core::{AppVersion, ClusterTask, ServiceInstanceConfig, TaskId, TaskSnapshot};

use crate::error::{MetricsError, MetricsResult};

/// The tasks an autoscaling cycle works from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredTasks {
    /// Healthy tasks across all application versions, keyed by task id.
    pub healthy: BTreeMap<TaskId, TaskSnapshot>,
    /// The unfiltered cluster-level inventory, for resource accounting.
    pub cluster_tasks: Vec<ClusterTask>,
}

impl FilteredTasks {
    pub fn healthy_count(&self) -> usize {
        self.healthy.len()
    }
}

/// Reduce a service instance's application versions to its healthy tasks.
///
/// Fails with [`MetricsError::NoData`] when nothing healthy remains.
pub fn filter_autoscaling_tasks(
    apps: &[AppVersion],
    all_cluster_tasks: &[ClusterTask],
    config: &ServiceInstanceConfig,
) -> MetricsResult<FilteredTasks> {
    let job_id = config.job_id();
    info!(%job_id, versions = apps.len(), "inspecting tasks for autoscaling");

    let own_apps: Vec<&AppVersion> = apps
        .iter()
        .filter(|app| app.service == config.service && app.instance == config.instance)
        .collect();
    let current_version = own_apps.iter().map(|app| app.version).max();

    let mut healthy = BTreeMap::new();
    for app in own_apps {
        let superseded = current_version.is_some_and(|current| app.version < current);
        for task in &app.tasks {
            if is_task_usable(app, task, superseded) {
                healthy.insert(task.id.clone(), task.clone());
            } else {
                debug!(%job_id, task_id = %task.id, app_id = %app.id, "excluding unhealthy task");
            }
        }
    }

    if healthy.is_empty() {
        return Err(MetricsError::NoData(format!(
            "couldn't find any healthy tasks for {job_id}"
        )));
    }

    Ok(FilteredTasks {
        healthy,
        cluster_tasks: all_cluster_tasks.to_vec(),
    })
}

fn is_task_usable(app: &AppVersion, task: &TaskSnapshot, superseded: bool) -> bool {
    if app.health_checks.is_empty() || task.is_healthy() {
        return true;
    }
    superseded && task.health_check_results.is_empty()
}
