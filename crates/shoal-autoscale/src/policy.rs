//! Decision policies: utilization in, instance-count delta out.
//!
//! `threshold` and `proportional` are pure. `pid` carries its integral
//! and derivative state across cycles in the coordination store.

use shoal_state::{Coordinator, StateResult, paths};
use tracing::debug;

// ── Shared helpers ─────────────────────────────────────────────────

/// Normalized distance from the setpoint: 0 at the setpoint, 1 at full
/// utilization, negative when underutilized.
pub fn utilization_error(utilization: f64, setpoint: f64) -> f64 {
    (utilization - setpoint) / (1.0 - setpoint)
}

/// Describe an error value for operators.
pub fn humanize_error(error: f64) -> String {
    if error < 0.0 {
        format!("{}% underutilized", (-error * 100.0).floor() as i64)
    } else if error > 0.0 {
        format!("{}% overutilized", (error * 100.0).ceil() as i64)
    } else {
        "utilization within thresholds".to_string()
    }
}

// ── Threshold ──────────────────────────────────────────────────────

/// Step one instance toward the setpoint when the error leaves the band.
pub fn threshold_decision(error: f64, threshold: f64) -> i64 {
    if error > threshold {
        1
    } else if error < -threshold {
        -1
    } else {
        0
    }
}

// ── Proportional ───────────────────────────────────────────────────

/// Inputs to [`proportional_decision`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionalInputs {
    pub utilization: f64,
    pub setpoint: f64,
    pub offset: f64,
    pub current_instances: u32,
    pub min_instances: u32,
    pub good_enough_window: Option<(f64, f64)>,
}

/// Scale in proportion to how far utilization sits from the setpoint.
///
/// Inside the good-enough window nothing changes, except that an
/// instance below its minimum is always brought up to it.
pub fn proportional_decision(inputs: ProportionalInputs) -> i64 {
    let ProportionalInputs {
        utilization,
        setpoint,
        offset,
        current_instances,
        min_instances,
        good_enough_window,
    } = inputs;

    if let Some((low, high)) = good_enough_window
        && (low..=high).contains(&utilization)
    {
        return if current_instances < min_instances {
            i64::from(min_instances) - i64::from(current_instances)
        } else {
            0
        };
    }

    let relative_error = (utilization - setpoint) / (setpoint - offset);
    // f64::round rounds half away from zero.
    (f64::from(current_instances) * relative_error).round() as i64
}

// ── PID ────────────────────────────────────────────────────────────

/// Proportional gain.
pub const PID_KP: f64 = 4.0;
/// Integral gain, per second.
pub const PID_KI: f64 = 4.0 / 300.0;
/// Derivative gain, in seconds.
pub const PID_KD: f64 = 300.0;

/// Controller memory between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidState {
    pub iterm: f64,
    pub last_error: f64,
    /// Epoch seconds of the previous step; 0 before the first one.
    pub last_time: f64,
}

impl PidState {
    /// Stored state, or zeroes if any part is missing or unreadable.
    pub fn load<C: Coordinator>(coordinator: &C, service: &str, instance: &str) -> StateResult<Self> {
        let read = |path: String| -> StateResult<Option<f64>> {
            Ok(coordinator
                .get(&path)?
                .and_then(|raw| String::from_utf8_lossy(&raw).trim().parse::<f64>().ok()))
        };
        let iterm = read(paths::pid_iterm(service, instance))?;
        let last_error = read(paths::pid_last_error(service, instance))?;
        let last_time = read(paths::pid_last_time(service, instance))?;

        match (iterm, last_error, last_time) {
            (Some(iterm), Some(last_error), Some(last_time)) => Ok(Self {
                iterm,
                last_error,
                last_time,
            }),
            _ => {
                debug!(%service, %instance, "no pid state, starting from zero");
                Ok(Self::default())
            }
        }
    }

    pub fn save<C: Coordinator>(&self, coordinator: &C, service: &str, instance: &str) -> StateResult<()> {
        coordinator.set(&paths::pid_iterm(service, instance), format!("{}", self.iterm).as_bytes())?;
        coordinator.set(
            &paths::pid_last_error(service, instance),
            format!("{}", self.last_error).as_bytes(),
        )?;
        coordinator.set(
            &paths::pid_last_time(service, instance),
            format!("{}", self.last_time).as_bytes(),
        )
    }
}

/// One PID step. The integral term and the output are both clamped to
/// the delta range that keeps the count within `[min, max]`.
pub fn pid_decision(
    state: PidState,
    error: f64,
    now: f64,
    current_instances: u32,
    min_instances: u32,
    max_instances: u32,
) -> (i64, PidState) {
    let min_delta = f64::from(min_instances) - f64::from(current_instances);
    let max_delta = f64::from(max_instances) - f64::from(current_instances);
    let clamp = |value: f64| value.max(min_delta).min(max_delta);

    let elapsed = now - state.last_time;
    let iterm = clamp(state.iterm + PID_KI * error * elapsed.max(0.0));
    let derivative = if elapsed > 0.0 {
        PID_KD * (error - state.last_error) / elapsed
    } else {
        0.0
    };

    let delta = clamp(PID_KP * error + iterm + derivative).round() as i64;
    let next = PidState {
        iterm,
        last_error: error,
        last_time: now,
    };
    (delta, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_state::StateStore;

    fn proportional(utilization: f64, offset: f64) -> i64 {
        proportional_decision(ProportionalInputs {
            utilization,
            setpoint: 0.5,
            offset,
            current_instances: 10,
            min_instances: 1,
            good_enough_window: None,
        })
    }

    #[test]
    fn threshold_steps() {
        assert_eq!(threshold_decision(0.0, 0.1), 0);
        assert_eq!(threshold_decision(0.5, 0.1), 1);
        assert_eq!(threshold_decision(-0.5, 0.1), -1);
        assert_eq!(threshold_decision(0.1, 0.1), 0);
    }

    #[test]
    fn utilization_error_normalizes() {
        assert_eq!(utilization_error(0.8, 0.8), 0.0);
        assert!((utilization_error(1.0, 0.8) - 1.0).abs() < 1e-9);
        assert!((utilization_error(0.4, 0.8) + 2.0).abs() < 1e-9);
    }

    #[test]
    fn proportional_dead_band() {
        assert_eq!(proportional(0.524, 0.0), 0);
        assert_eq!(proportional(0.476, 0.0), 0);
        assert_eq!(proportional(0.526, 0.0), 1);
        assert_eq!(proportional(0.474, 0.0), -1);
        assert_eq!(proportional(0.75, 0.0), 5);
        assert_eq!(proportional(0.25, 0.0), -5);
    }

    #[test]
    fn proportional_with_offset() {
        assert_eq!(proportional(0.514, 0.2), 0);
        assert_eq!(proportional(0.486, 0.2), 0);
        assert_eq!(proportional(0.516, 0.2), 1);
        assert_eq!(proportional(0.484, 0.2), -1);
        assert_eq!(proportional(0.65, 0.2), 5);
        assert_eq!(proportional(0.35, 0.2), -5);
    }

    #[test]
    fn good_enough_window_holds() {
        let inputs = |utilization, current_instances, min_instances| ProportionalInputs {
            utilization,
            setpoint: 0.5,
            offset: 0.0,
            current_instances,
            min_instances,
            good_enough_window: Some((0.45, 0.55)),
        };

        assert_eq!(proportional_decision(inputs(0.54, 10, 1)), 0);
        assert_eq!(proportional_decision(inputs(0.46, 10, 1)), 0);
        // Below the floor the window does not apply.
        assert_eq!(proportional_decision(inputs(0.54, 25, 50)), 25);
        assert_eq!(proportional_decision(inputs(0.46, 25, 50)), 25);
        // Outside the window the proportional rule takes over.
        assert_eq!(proportional_decision(inputs(0.75, 10, 1)), 5);
    }

    #[test]
    fn humanized_errors() {
        assert_eq!(humanize_error(-0.255), "25% underutilized");
        assert_eq!(humanize_error(0.101), "11% overutilized");
        assert_eq!(humanize_error(0.0), "utilization within thresholds");
    }

    #[test]
    fn pid_proportional_and_integral() {
        let state = PidState {
            iterm: 0.0,
            last_error: 0.5,
            last_time: 0.0,
        };
        let (delta, next) = pid_decision(state, 0.5, 300.0, 10, 1, 100);
        // 4 * 0.5 + (4/300 * 0.5 * 300) + 0 derivative
        assert_eq!(delta, 4);
        assert!((next.iterm - 2.0).abs() < 1e-9);
        assert_eq!(next.last_error, 0.5);
        assert_eq!(next.last_time, 300.0);
    }

    #[test]
    fn pid_output_clamped_to_bounds() {
        let (delta, next) = pid_decision(PidState::default(), 1.0, 1e6, 10, 5, 12);
        assert_eq!(delta, 2);
        assert_eq!(next.iterm, 2.0);

        let (delta, _) = pid_decision(PidState::default(), -1.0, 1e6, 10, 5, 12);
        assert_eq!(delta, -5);
    }

    #[test]
    fn pid_state_persists() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(PidState::load(&store, "web", "main").unwrap(), PidState::default());

        let state = PidState {
            iterm: 1.5,
            last_error: -0.25,
            last_time: 1_700_000_000.5,
        };
        state.save(&store, "web", "main").unwrap();
        assert_eq!(PidState::load(&store, "web", "main").unwrap(), state);
    }
}
