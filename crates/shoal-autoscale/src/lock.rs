//! Bounded lock acquisition on top of [`Coordinator::try_lock`].

use std::time::Duration;

use shoal_state::{Coordinator, StateResult};
use tokio::time::Instant;
use tracing::debug;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Poll for the lock at `path` until `timeout` elapses.
///
/// Returns `Ok(None)` when the deadline passes with the lock still held
/// elsewhere. Store errors end the wait immediately.
pub async fn acquire_lock<C: Coordinator>(
    coordinator: &C,
    path: &str,
    holder: &str,
    timeout: Duration,
) -> StateResult<Option<C::Guard>> {
    let deadline = Instant::now() + timeout;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if let Some(guard) = coordinator.try_lock(path, holder)? {
            return Ok(Some(guard));
        }
        let now = Instant::now();
        if now >= deadline {
            debug!(%path, %holder, ?timeout, "gave up waiting for lock");
            return Ok(None);
        }
        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
