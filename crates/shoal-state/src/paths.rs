//! Coordination path layout.
//!
//! ```text
//! /autoscaling/paused                               epoch seconds
//! /autoscaling/{service}/{instance}/instances       last applied count
//! /autoscaling/{service}/{instance}/cpu_data        "cpu_seconds:task_id,..."
//! /autoscaling/{service}/{instance}/cpu_last_time   epoch seconds
//! /autoscaling/{service}/{instance}/historical_load 16-byte records
//! /autoscaling/{service}/{instance}/pid_*           pid controller state
//! /autoscaling/{service}/{instance}/lock            per-instance lock
//! ```

pub const AUTOSCALING_ROOT: &str = "/autoscaling";

pub fn paused() -> String {
    format!("{AUTOSCALING_ROOT}/paused")
}

/// Root of one service instance's subtree.
pub fn instance_root(service: &str, instance: &str) -> String {
    format!("{AUTOSCALING_ROOT}/{service}/{instance}")
}

pub fn instances(service: &str, instance: &str) -> String {
    format!("{}/instances", instance_root(service, instance))
}

pub fn cpu_data(service: &str, instance: &str) -> String {
    format!("{}/cpu_data", instance_root(service, instance))
}

pub fn cpu_last_time(service: &str, instance: &str) -> String {
    format!("{}/cpu_last_time", instance_root(service, instance))
}

pub fn historical_load(service: &str, instance: &str) -> String {
    format!("{}/historical_load", instance_root(service, instance))
}

pub fn pid_iterm(service: &str, instance: &str) -> String {
    format!("{}/pid_iterm", instance_root(service, instance))
}

pub fn pid_last_error(service: &str, instance: &str) -> String {
    format!("{}/pid_last_error", instance_root(service, instance))
}

pub fn pid_last_time(service: &str, instance: &str) -> String {
    format!("{}/pid_last_time", instance_root(service, instance))
}

pub fn lock(service: &str, instance: &str) -> String {
    format!("{}/lock", instance_root(service, instance))
}
