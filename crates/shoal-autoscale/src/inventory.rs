//! Task inventory: what the cluster manager reports as running.

use std::future::Future;
use std::time::Duration;

use shoal_core::{AppVersion, ClusterTask, Inventory};
use shoal_metrics::http::fetch_json;
use tracing::debug;

use crate::error::{AutoscaleError, AutoscaleResult};

/// Source of the cluster-wide task inventory, fetched once per cycle.
pub trait TaskInventory: Send + Sync {
    fn fetch(&self) -> impl Future<Output = AutoscaleResult<Inventory>> + Send;
}

/// Reads `/v1/apps` and `/v1/tasks` from the cluster manager's API.
#[derive(Debug, Clone)]
pub struct HttpInventory {
    address: String,
    timeout: Duration,
}

impl HttpInventory {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

impl TaskInventory for HttpInventory {
    async fn fetch(&self) -> AutoscaleResult<Inventory> {
        let apps: Vec<AppVersion> = fetch_json(&self.address, "v1/apps", self.timeout)
            .await
            .map_err(|e| AutoscaleError::Inventory(format!("{}/v1/apps: {e}", self.address)))?;
        let cluster_tasks: Vec<ClusterTask> = fetch_json(&self.address, "v1/tasks", self.timeout)
            .await
            .map_err(|e| AutoscaleError::Inventory(format!("{}/v1/tasks: {e}", self.address)))?;

        debug!(
            apps = apps.len(),
            cluster_tasks = cluster_tasks.len(),
            "task inventory fetched"
        );
        Ok(Inventory { apps, cluster_tasks })
    }
}

/// A fixed inventory, for `once` runs against a captured snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory(pub Inventory);

impl TaskInventory for StaticInventory {
    async fn fetch(&self) -> AutoscaleResult<Inventory> {
        Ok(self.0.clone())
    }
}
