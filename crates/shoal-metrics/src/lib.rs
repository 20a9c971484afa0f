//! shoal-metrics: utilization readings for autoscaled service instances.
//!
//! Reduces a service instance's tasks to the ones worth measuring, then
//! asks the configured provider for a single utilization figure.
//!
//! # Architecture
//!
//! ```text
//! filter_autoscaling_tasks()  apps + cluster tasks → FilteredTasks
//! MetricsProviders::utilization()
//!   ├── mesos_cpu  CpuStatsSource (agent /monitor/statistics) + cpu_data snapshot
//!   ├── http       GET {endpoint} → {"utilization": f}
//!   └── uwsgi      GET {endpoint} → {"workers": [{"status": ...}]}
//! render_prometheus()         ServiceAutoscalingInfo → text exposition
//! ```
//!
//! Every network call carries its own timeout. An HTTP timeout reads as
//! full utilization; a missing CPU sample drops the task from the mean.

pub mod error;
pub mod filter;
pub mod http;
pub mod prometheus;
pub mod providers;

pub use error::{MetricsError, MetricsResult};
pub use filter::{FilteredTasks, filter_autoscaling_tasks};
pub use prometheus::render_prometheus;
pub use providers::mesos_cpu::{AgentStatsClient, CpuStats, CpuStatsSource};
pub use providers::{HttpSettings, MetricsProviders};
