//! shoal-core: shared domain types and configuration for Shoal.
//!
//! Holds the types every other crate speaks (service instance configs,
//! task snapshots, autoscaling info) and the TOML loaders for the system
//! config and the per-service SOA files.

pub mod config;
pub mod types;

pub use config::{
    AutoscalerSettings, ConfigError, ConfigResult, ConfigSource, InventorySettings, SoaDir,
    SystemConfig, parse_duration,
};
pub use types::*;
