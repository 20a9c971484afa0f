//! shoal-state: coordination store for Shoal.
//!
//! Backed by [redb](https://docs.rs/redb), provides the shared state the
//! autoscaler coordinates through: per-instance counters and snapshots
//! keyed by path, leased mutual-exclusion locks, and the fleet-wide pause
//! switch.
//!
//! # Architecture
//!
//! ```text
//! Coordinator (trait)
//!   └── StateStore (redb)
//!         ├── keys   table: "/autoscaling/{service}/{instance}/..." → bytes
//!         └── locks  table: lock path → JSON lease {holder, expires_at}
//! ```
//!
//! Paths mirror a hierarchical coordination service so the layout stays
//! portable to one. `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod coordinator;
pub mod error;
pub mod paths;
pub mod records;
pub mod store;
pub mod tables;

pub use coordinator::Coordinator;
pub use error::{StateError, StateResult};
pub use store::{LockGuard, StateStore};
