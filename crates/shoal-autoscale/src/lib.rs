//! shoal-autoscale: decide and apply instance counts.
//!
//! For every autoscaled service instance, reads a utilization figure from
//! the configured metrics provider, turns it into an instance-count delta
//! with the configured decision policy, applies safety limits, and writes
//! the result to the coordination store for the deployment reconciler.
//!
//! # Scaling Algorithm
//!
//! ```text
//! error     = (utilization - setpoint) / (1 - setpoint)
//!
//! threshold:     +1 if error > threshold, -1 if error < -threshold
//! proportional:  round(current * (forecast - setpoint) / (setpoint - offset))
//!                0 inside good_enough_window (unless below min_instances)
//! pid:           Kp*error + integral + Kd*d(error)/dt, clamped to [min, max]
//!
//! proposed = max(current + delta, floor(current * (1 - max_downscale_fraction)))
//! proposed = clamp(proposed, min_instances, max_instances)
//! ```
//!
//! A scale-down is refused when the healthy task count strays more than
//! `max_task_delta` from the expected count.

pub mod error;
pub mod fleet;
pub mod forecast;
pub mod history;
pub mod inventory;
pub mod lock;
pub mod policy;
pub mod scaler;

pub use error::{AutoscaleError, AutoscaleResult};
pub use fleet::{CycleReport, ScaleOutLoop, epoch_secs_f64};
pub use history::{MAX_HISTORY_BYTES, deserialize_history, serialize_history};
pub use inventory::{HttpInventory, StaticInventory, TaskInventory};
pub use scaler::{Autoscaler, Outcome, ScalingLimits, SkipReason};
