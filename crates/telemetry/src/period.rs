//! Zero-crossing period estimation
//!
//! Tracks sign flips of a monitored angle. The period is the time between
//! the two most recent flips in the same direction, so amplitude decay of
//! a damped oscillator does not bias it.

use std::collections::VecDeque;
use std::fmt;

use contracts::TelemetryConfig;
use ringbuf::{traits::*, HeapRb};

/// Estimator bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodConfig {
    /// Flips older than this (seconds) are forgotten
    pub window: f64,
    /// Accepted period range (seconds)
    pub min: f64,
    pub max: f64,
    /// Moving average length over accepted periods
    pub smoothing: usize,
}

impl From<&TelemetryConfig> for PeriodConfig {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            window: config.period_window_s,
            min: config.period_min_s,
            max: config.period_max_s,
            smoothing: config.period_smoothing.max(1),
        }
    }
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self::from(&TelemetryConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy)]
struct Flip {
    time: f64,
    direction: Direction,
}

/// Last sample with a non-zero angle
#[derive(Debug, Clone, Copy)]
struct Sample {
    time: f64,
    angle: f64,
}

pub struct PeriodEstimator {
    config: PeriodConfig,
    last: Option<Sample>,
    last_time: Option<f64>,
    flips: VecDeque<Flip>,
    accepted: HeapRb<f64>,
}

impl fmt::Debug for PeriodEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodEstimator")
            .field("flips", &self.flips.len())
            .field("accepted", &self.accepted.occupied_len())
            .field("period", &self.period())
            .finish()
    }
}

impl PeriodEstimator {
    pub fn new(config: PeriodConfig) -> Self {
        Self {
            accepted: HeapRb::new(config.smoothing.max(1)),
            config,
            last: None,
            last_time: None,
            flips: VecDeque::new(),
        }
    }

    /// Feed one sample, returns the smoothed period if one is known
    ///
    /// Time moving backwards (rewind) clears all history first.
    pub fn update(&mut self, time: f64, angle: f64) -> Option<f64> {
        if !time.is_finite() || !angle.is_finite() {
            return self.period();
        }
        if self.last_time.is_some_and(|last| time < last) {
            self.reset();
        }
        self.last_time = Some(time);

        if angle == 0.0 {
            return self.period();
        }

        let current = Sample { time, angle };
        if let Some(prev) = self.last.replace(current) {
            if prev.angle.signum() != angle.signum() {
                let direction = if angle > 0.0 {
                    Direction::Rising
                } else {
                    Direction::Falling
                };
                self.record_flip(Flip {
                    time: crossing_time(prev, current),
                    direction,
                });
            }
        }

        self.prune(time);
        self.period()
    }

    /// Simple moving average of the accepted periods
    pub fn period(&self) -> Option<f64> {
        let n = self.accepted.occupied_len();
        if n == 0 {
            return None;
        }
        Some(self.accepted.iter().sum::<f64>() / n as f64)
    }

    /// Number of flips currently retained
    pub fn flip_count(&self) -> usize {
        self.flips.len()
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.last_time = None;
        self.flips.clear();
        self.accepted.clear();
    }

    fn record_flip(&mut self, flip: Flip) {
        let previous = self
            .flips
            .iter()
            .rev()
            .find(|f| f.direction == flip.direction)
            .map(|f| f.time);

        if let Some(previous) = previous {
            let period = flip.time - previous;
            if period >= self.config.min && period <= self.config.max {
                self.accepted.push_overwrite(period);
            }
        }
        self.flips.push_back(flip);
    }

    fn prune(&mut self, now: f64) {
        let horizon = now - self.config.window;
        while self.flips.front().is_some_and(|f| f.time < horizon) {
            self.flips.pop_front();
        }
    }
}

impl Default for PeriodEstimator {
    fn default() -> Self {
        Self::new(PeriodConfig::default())
    }
}

/// Linear interpolation of the zero crossing between two samples
fn crossing_time(prev: Sample, current: Sample) -> f64 {
    let span = current.angle - prev.angle;
    if span == 0.0 {
        return current.time;
    }
    prev.time + (current.time - prev.time) * (-prev.angle / span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn feed(estimator: &mut PeriodEstimator, period: f64, until: f64, dt: f64, decay: f64) -> Option<f64> {
        let mut result = None;
        let steps = (until / dt) as usize;
        for i in 1..=steps {
            let t = i as f64 * dt;
            let angle = 0.4 * (-decay * t).exp() * (2.0 * PI * t / period).sin();
            result = estimator.update(t, angle);
        }
        result
    }

    #[test]
    fn test_sine_converges() {
        let mut estimator = PeriodEstimator::default();
        let estimate = feed(&mut estimator, 2.0, 5.0, 0.05, 0.0).unwrap();
        assert!((estimate - 2.0).abs() / 2.0 < 0.05, "estimate {estimate}");
    }

    #[test]
    fn test_damped_signal() {
        let mut estimator = PeriodEstimator::default();
        let estimate = feed(&mut estimator, 1.5, 8.0, 0.02, 0.3).unwrap();
        assert!((estimate - 1.5).abs() / 1.5 < 0.05, "estimate {estimate}");
    }

    #[test]
    fn test_no_estimate_before_two_same_direction_flips() {
        let mut estimator = PeriodEstimator::default();
        // half a period: one falling flip only
        assert!(feed(&mut estimator, 2.0, 1.5, 0.05, 0.0).is_none());
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut estimator = PeriodEstimator::default();
        // 0.1 s is below the 0.3 s floor
        assert!(feed(&mut estimator, 0.1, 2.0, 0.005, 0.0).is_none());
        assert!(estimator.flip_count() > 0);
    }

    #[test]
    fn test_rewind_clears_history() {
        let mut estimator = PeriodEstimator::default();
        assert!(feed(&mut estimator, 2.0, 5.0, 0.05, 0.0).is_some());
        assert!(estimator.update(0.0, 0.1).is_none());
        assert_eq!(estimator.flip_count(), 0);
    }

    #[test]
    fn test_smoothing_averages_last_samples() {
        let mut estimator = PeriodEstimator::new(PeriodConfig {
            window: 100.0,
            min: 0.1,
            max: 100.0,
            smoothing: 3,
        });
        let samples = [(0.0, -1.0), (1.0, 1.0), (2.0, -1.0), (4.0, 1.0), (5.0, -1.0), (8.0, 1.0)];
        let mut last = None;
        for (t, angle) in samples {
            last = estimator.update(t, angle);
        }
        // periods 2.5, 3.0, 3.5
        assert!((last.unwrap() - 3.0).abs() < 1e-9);

        // oldest sample drops out: 3.0, 3.5, 4.0
        let next = estimator.update(9.0, -1.0).unwrap();
        assert!((next - 3.5).abs() < 1e-9);
    }
}
