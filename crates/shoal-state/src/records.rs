//! Typed records on top of the raw coordination paths: the persisted
//! instance count and the fleet-wide pause switch.

use tracing::{debug, warn};

use crate::coordinator::Coordinator;
use crate::error::{StateError, StateResult};
use crate::paths;

/// The last instance count the autoscaler (or an operator) applied.
pub fn get_instances<C: Coordinator>(
    coordinator: &C,
    service: &str,
    instance: &str,
) -> StateResult<Option<u32>> {
    let path = paths::instances(service, instance);
    let Some(raw) = coordinator.get(&path)? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&raw);
    text.trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|_| StateError::Malformed {
            path,
            value: text.into_owned(),
        })
}

/// Persist a new instance count. The deployment reconciler watches this.
pub fn set_instances<C: Coordinator>(
    coordinator: &C,
    service: &str,
    instance: &str,
    count: u32,
) -> StateResult<()> {
    coordinator.set(
        &paths::instances(service, instance),
        count.to_string().as_bytes(),
    )
}

/// The pause expiry, if one is set and readable.
pub fn pause_expiry<C: Coordinator>(coordinator: &C) -> StateResult<Option<f64>> {
    let path = paths::paused();
    let Some(raw) = coordinator.get(&path)? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&raw);
    match text.trim().parse::<f64>() {
        Ok(expiry) if expiry.is_finite() => Ok(Some(expiry)),
        _ => {
            warn!(%path, value = %text, "ignoring malformed pause value");
            Ok(None)
        }
    }
}

/// Suppress all autoscaling decisions until `expiry` (epoch seconds).
pub fn pause_until<C: Coordinator>(coordinator: &C, expiry: f64) -> StateResult<()> {
    debug!(expiry, "pausing autoscaler");
    coordinator.set(&paths::paused(), format!("{expiry}").as_bytes())
}

/// Lift the pause. Returns true if one was set.
pub fn unpause<C: Coordinator>(coordinator: &C) -> StateResult<bool> {
    coordinator.delete(&paths::paused())
}

/// Whether autoscaling is paused at `now`.
pub fn is_paused<C: Coordinator>(coordinator: &C, now: f64) -> StateResult<bool> {
    Ok(pause_expiry(coordinator)?.is_some_and(|expiry| now < expiry))
}
