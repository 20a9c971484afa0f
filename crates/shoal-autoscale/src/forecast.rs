//! Forecast strategies: turn a fresh utilization sample plus the stored
//! series into the value the proportional policy acts on.

use std::time::Duration;

use shoal_core::{
    AutoscalingParams, ConfigError, ConfigResult, ForecastPolicyKind, HistoricalLoadRecord,
    parse_duration,
};

use crate::history::MAX_HISTORY_RECORDS;

/// Blends a new sample into the historical series.
pub trait ForecastStrategy: Send + Sync {
    /// Returns the forecast value and the series with `sample` appended.
    fn forecast(
        &self,
        sample: HistoricalLoadRecord,
        history: Vec<HistoricalLoadRecord>,
    ) -> (f64, Vec<HistoricalLoadRecord>);
}

/// Acts on the latest sample as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentLoad;

impl ForecastStrategy for CurrentLoad {
    fn forecast(
        &self,
        sample: HistoricalLoadRecord,
        history: Vec<HistoricalLoadRecord>,
    ) -> (f64, Vec<HistoricalLoadRecord>) {
        (sample.load, append_sample(history, sample))
    }
}

/// Mean of every sample no older than `window` before the newest one.
#[derive(Debug, Clone, Copy)]
pub struct MovingAverage {
    pub window: Duration,
}

impl ForecastStrategy for MovingAverage {
    fn forecast(
        &self,
        sample: HistoricalLoadRecord,
        history: Vec<HistoricalLoadRecord>,
    ) -> (f64, Vec<HistoricalLoadRecord>) {
        let history = append_sample(history, sample);
        let cutoff = sample.timestamp - self.window.as_secs_f64();

        let (sum, count) = history
            .iter()
            .filter(|record| record.timestamp >= cutoff && record.timestamp <= sample.timestamp)
            .fold((0.0, 0usize), |(sum, count), record| (sum + record.load, count + 1));

        // The sample itself always falls inside its own window.
        let value = if count == 0 { sample.load } else { sum / count as f64 };
        (value, history)
    }
}

/// Append `sample`, keeping at most the newest [`MAX_HISTORY_RECORDS`].
pub fn append_sample(
    mut history: Vec<HistoricalLoadRecord>,
    sample: HistoricalLoadRecord,
) -> Vec<HistoricalLoadRecord> {
    history.push(sample);
    if history.len() > MAX_HISTORY_RECORDS {
        let excess = history.len() - MAX_HISTORY_RECORDS;
        history.drain(..excess);
    }
    history
}

/// Build the configured strategy for an instance.
pub fn strategy_for(params: &AutoscalingParams) -> ConfigResult<Box<dyn ForecastStrategy>> {
    match params.forecast_policy {
        ForecastPolicyKind::Current => Ok(Box::new(CurrentLoad)),
        ForecastPolicyKind::MovingAverage => {
            let window = parse_duration(&params.moving_average_window)
                .ok_or_else(|| ConfigError::InvalidDuration(params.moving_average_window.clone()))?;
            Ok(Box::new(MovingAverage { window }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: f64, load: f64) -> HistoricalLoadRecord {
        HistoricalLoadRecord { timestamp, load }
    }

    #[test]
    fn current_returns_sample_and_appends() {
        let (value, history) = CurrentLoad.forecast(record(20.0, 0.9), vec![record(10.0, 0.1)]);
        assert_eq!(value, 0.9);
        assert_eq!(history, vec![record(10.0, 0.1), record(20.0, 0.9)]);
    }

    #[test]
    fn moving_average_respects_window() {
        let strategy = MovingAverage {
            window: Duration::from_secs(60),
        };
        let history = vec![record(0.0, 10.0), record(50.0, 0.2), record(80.0, 0.4)];

        let (value, history) = strategy.forecast(record(100.0, 0.6), history);
        // Only samples at t >= 40 count.
        assert!((value - 0.4).abs() < 1e-9);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn moving_average_of_empty_history_is_sample() {
        let strategy = MovingAverage {
            window: Duration::from_secs(60),
        };
        let (value, _) = strategy.forecast(record(5.0, 0.7), Vec::new());
        assert_eq!(value, 0.7);
    }

    #[test]
    fn append_is_bounded() {
        let history = vec![record(0.0, 0.0); MAX_HISTORY_RECORDS];
        let history = append_sample(history, record(1.0, 1.0));
        assert_eq!(history.len(), MAX_HISTORY_RECORDS);
        assert_eq!(history.last(), Some(&record(1.0, 1.0)));
    }

    #[test]
    fn strategy_from_params() {
        let mut params = AutoscalingParams::default();
        let (value, _) = strategy_for(&params).unwrap().forecast(record(1.0, 0.3), Vec::new());
        assert_eq!(value, 0.3);

        params.forecast_policy = ForecastPolicyKind::MovingAverage;
        params.moving_average_window = "later".to_string();
        assert!(strategy_for(&params).is_err());
    }
}
