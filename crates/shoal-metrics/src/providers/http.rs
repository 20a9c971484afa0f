//! HTTP and uWSGI providers: poll a status endpoint on every healthy task.
//!
//! A task that times out counts as fully utilized. A task that fails any
//! other way is logged with its address and left out of the mean; the
//! reading fails only when no task answered.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{MetricsError, MetricsResult};
use crate::filter::FilteredTasks;
use crate::http::{FetchError, fetch_json};

use super::HttpSettings;

/// Utilization assumed for a task whose endpoint did not answer in time.
pub const TIMEOUT_UTILIZATION: f64 = 1.0;

/// Extracts a utilization fraction from a status payload.
pub type PayloadParser = fn(&Value) -> Option<f64>;

/// `{"utilization": 0.42}`. Numeric strings are accepted too.
pub fn parse_http_utilization(payload: &Value) -> Option<f64> {
    let utilization: Option<f64> = match payload.get("utilization")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    utilization.filter(|u| u.is_finite())
}

/// `{"workers": [{"status": "idle"}, {"status": "busy"}, ...]}`.
///
/// Every worker that is not idle counts as busy.
pub fn parse_uwsgi_utilization(payload: &Value) -> Option<f64> {
    let workers = payload.get("workers")?.as_array()?;
    if workers.is_empty() {
        return None;
    }
    let mut busy = 0usize;
    for worker in workers {
        let status = worker.get("status")?.as_str()?;
        if status != "idle" {
            busy += 1;
        }
    }
    Some(busy as f64 / workers.len() as f64)
}

/// Mean utilization reported by `endpoint` across the healthy tasks.
pub async fn endpoint_utilization(
    job_id: &str,
    tasks: &FilteredTasks,
    endpoint: &str,
    settings: &HttpSettings,
    parser: PayloadParser,
) -> MetricsResult<f64> {
    let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut set = JoinSet::new();

    for task in tasks.healthy.values() {
        let Some(address) = task.address() else {
            debug!(%job_id, task_id = %task.id, "task has no ports, skipping");
            continue;
        };
        let permits = permits.clone();
        let endpoint = endpoint.to_string();
        let timeout = settings.timeout;
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = fetch_json::<Value>(&address, &endpoint, timeout).await;
            (address, result)
        });
    }

    let mut readings = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (address, result) = match joined {
            Ok(answered) => answered,
            Err(e) => {
                error!(%job_id, error = %e, "status request task failed");
                continue;
            }
        };
        match result {
            Ok(payload) => match parser(&payload) {
                Some(utilization) => readings.push(utilization),
                None => {
                    error!(%job_id, %address, %endpoint, "malformed utilization payload");
                }
            },
            Err(FetchError::Timeout(after)) => {
                debug!(%job_id, %address, ?after, "status endpoint timed out, assuming full utilization");
                readings.push(TIMEOUT_UTILIZATION);
            }
            Err(e) => {
                error!(%job_id, %address, %endpoint, error = %e, "failed to read utilization");
            }
        }
    }

    if readings.is_empty() {
        return Err(MetricsError::NoData(format!(
            "no task of {job_id} reported utilization"
        )));
    }
    Ok(readings.iter().sum::<f64>() / readings.len() as f64)
}
