//! Metrics provider error types.

use thiserror::Error;

/// Result type alias for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors that can occur while computing utilization.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// No usable sample this cycle. The instance keeps its current count.
    #[error("no metrics data: {0}")]
    NoData(String),

    /// The instance's scaling is controlled outside Shoal.
    #[error("{0} uses a bespoke autoscaler")]
    Bespoke(String),

    #[error("state store error: {0}")]
    State(#[from] shoal_state::StateError),
}
