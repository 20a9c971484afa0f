//! redb table definitions for the coordination store.
//!
//! Both tables use `&str` path keys and `&[u8]` values.

use redb::TableDefinition;

/// Arbitrary values keyed by coordination path.
pub const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("keys");

/// JSON-encoded lock leases keyed by lock path.
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");
