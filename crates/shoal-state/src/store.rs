//! StateStore: redb-backed coordination store.
//!
//! Values are raw bytes keyed by coordination path. Locks are leases
//! written in a single write transaction, which redb serializes, so two
//! evaluators can never both observe the lock as free. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coordinator::Coordinator;
use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(300);

/// A lock lease as persisted in the `locks` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Lease {
    holder: String,
    /// Unix timestamp (seconds) after which the lease may be taken over.
    expires_at: f64,
}

/// Thread-safe coordination store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    lock_lease: Duration,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            lock_lease: DEFAULT_LOCK_LEASE,
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            lock_lease: DEFAULT_LOCK_LEASE,
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Set how long a lock stays valid when its holder never releases it.
    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(KEYS).map_err(map_err!(Table))?;
        txn.open_table(LOCKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Keys ───────────────────────────────────────────────────────

    /// Read the value stored at a path.
    pub fn get(&self, path: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KEYS).map_err(map_err!(Table))?;
        let value = table
            .get(path)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    /// Insert or overwrite the value at a path.
    pub fn set(&self, path: &str, value: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            table.insert(path, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, bytes = value.len(), "key stored");
        Ok(())
    }

    /// Delete a path. Returns true if it existed.
    pub fn delete(&self, path: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            existed = table.remove(path).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, existed, "key deleted");
        Ok(existed)
    }

    /// List all paths under a prefix, in key order.
    pub fn list_prefix(&self, prefix: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KEYS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(key.value().to_string());
            }
        }
        Ok(results)
    }

    // ── Locks ──────────────────────────────────────────────────────

    /// Take the lock at `path` unless another holder has an unexpired lease.
    pub fn try_lock(&self, path: &str, holder: &str) -> StateResult<Option<LockGuard>> {
        let now = epoch_secs_f64();
        let lease = Lease {
            holder: holder.to_string(),
            expires_at: now + self.lock_lease.as_secs_f64(),
        };
        let encoded = serde_json::to_vec(&lease).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let current: Option<Lease> = table
                .get(path)
                .map_err(map_err!(Read))?
                .and_then(|guard| serde_json::from_slice(guard.value()).ok());

            if let Some(current) = current {
                if current.expires_at > now && current.holder != holder {
                    debug!(%path, holder = %current.holder, "lock held");
                    return Ok(None);
                }
                if current.expires_at <= now {
                    warn!(%path, stale_holder = %current.holder, "taking over expired lock");
                }
            }
            table
                .insert(path, encoded.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, %holder, "lock acquired");

        Ok(Some(LockGuard {
            store: self.clone(),
            path: path.to_string(),
            holder: holder.to_string(),
        }))
    }

    /// Release a lock if `holder` still owns it. Returns true if released.
    fn release(&self, path: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let owner: Option<Lease> = table
                .get(path)
                .map_err(map_err!(Read))?
                .and_then(|guard| serde_json::from_slice(guard.value()).ok());
            released = owner.is_some_and(|lease| lease.holder == holder);
            if released {
                table.remove(path).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(released)
    }

    /// Whether any unexpired lease exists at `path`.
    pub fn is_locked(&self, path: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
        let lease: Option<Lease> = table
            .get(path)
            .map_err(map_err!(Read))?
            .and_then(|guard| serde_json::from_slice(guard.value()).ok());
        Ok(lease.is_some_and(|lease| lease.expires_at > epoch_secs_f64()))
    }
}

impl Coordinator for StateStore {
    type Guard = LockGuard;

    fn get(&self, path: &str) -> StateResult<Option<Vec<u8>>> {
        StateStore::get(self, path)
    }

    fn set(&self, path: &str, value: &[u8]) -> StateResult<()> {
        StateStore::set(self, path, value)
    }

    fn delete(&self, path: &str) -> StateResult<bool> {
        StateStore::delete(self, path)
    }

    fn try_lock(&self, path: &str, holder: &str) -> StateResult<Option<LockGuard>> {
        StateStore::try_lock(self, path, holder)
    }
}

/// Owns a lock until dropped.
pub struct LockGuard {
    store: StateStore,
    path: String,
    holder: String,
}

impl LockGuard {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match self.store.release(&self.path, &self.holder) {
            Ok(true) => debug!(path = %self.path, "lock released"),
            Ok(false) => warn!(path = %self.path, holder = %self.holder, "lock was taken over before release"),
            Err(e) => warn!(path = %self.path, error = %e, "failed to release lock"),
        }
    }
}

fn epoch_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
