//! Autoscaler error types.

use shoal_core::ConfigError;
use shoal_metrics::MetricsError;
use shoal_state::StateError;
use thiserror::Error;

/// Result type alias for autoscaler operations.
pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("metrics error: {0}")]
    Metrics(MetricsError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("task inventory unavailable: {0}")]
    Inventory(String),

    #[error("{0} has no max_instances, autoscaling is disabled")]
    NotAutoscaled(String),

    /// Every instance evaluated this cycle failed to reach the store.
    #[error("coordination store unreachable: all {0} evaluated instances failed")]
    StoreUnavailable(usize),
}

impl AutoscaleError {
    /// Whether the coordination store itself failed. A malformed value
    /// under one instance's paths is that instance's problem, not an outage.
    pub fn is_store_failure(&self) -> bool {
        match self {
            AutoscaleError::State(e) => e.is_unreachable(),
            AutoscaleError::StoreUnavailable(_) => true,
            _ => false,
        }
    }
}

impl From<MetricsError> for AutoscaleError {
    fn from(e: MetricsError) -> Self {
        match e {
            MetricsError::State(inner) => AutoscaleError::State(inner),
            other => AutoscaleError::Metrics(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_value_is_not_store_failure() {
        let malformed = AutoscaleError::State(StateError::Malformed {
            path: "/autoscaling/web/main/instances".to_string(),
            value: "ten".to_string(),
        });
        assert!(!malformed.is_store_failure());
        assert!(AutoscaleError::State(StateError::Read("lost".to_string())).is_store_failure());
        assert!(AutoscaleError::StoreUnavailable(2).is_store_failure());
        assert!(!AutoscaleError::Inventory("down".to_string()).is_store_failure());
    }
}
