//! The coordination interface the autoscaler is written against.

use crate::error::StateResult;

/// Key/value reads and writes plus non-blocking lock attempts.
///
/// `StateStore` is the production implementation. Waiting for a lock with a
/// deadline is layered on top of `try_lock` by the caller.
pub trait Coordinator: Clone + Send + Sync + 'static {
    /// Held for as long as the lock is owned; releases on drop.
    type Guard: Send + 'static;

    fn get(&self, path: &str) -> StateResult<Option<Vec<u8>>>;

    fn set(&self, path: &str, value: &[u8]) -> StateResult<()>;

    /// Remove a path. Returns true if it existed.
    fn delete(&self, path: &str) -> StateResult<bool>;

    fn exists(&self, path: &str) -> StateResult<bool> {
        Ok(self.get(path)?.is_some())
    }

    /// Take the lock at `path` for `holder` if it is free or its lease has
    /// expired. Returns `None` when someone else holds it.
    fn try_lock(&self, path: &str, holder: &str) -> StateResult<Option<Self::Guard>>;
}
