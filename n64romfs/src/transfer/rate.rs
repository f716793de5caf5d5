//! Transfer rate estimation.

use std::time::Duration;

/// Weight of the newest sample in the smoothed rate.
const SMOOTHING: f64 = 0.3;

/// Samples needed before an ETA is reported.
const MIN_SAMPLES: u32 = 2;

/// Exponentially smoothed bytes-per-second estimate.
#[derive(Debug, Clone, Default)]
pub struct RateEstimator {
    smoothed: Option<f64>,
    samples: u32,
}

impl RateEstimator {
    /// Record `bytes` moved in `elapsed` and return the instantaneous rate
    /// in bytes per second.
    ///
    /// Samples with zero elapsed time are ignored.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sample(&mut self, bytes: u64, elapsed: Duration) -> Option<u64> {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        let rate = bytes as f64 / secs;
        self.smoothed = Some(match self.smoothed {
            Some(prev) => SMOOTHING * rate + (1.0 - SMOOTHING) * prev,
            None => rate,
        });
        self.samples += 1;
        Some(rate as u64)
    }

    /// Smoothed rate in bytes per second, once any sample has been taken.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn rate(&self) -> Option<u64> {
        self.smoothed.map(|r| r as u64)
    }

    /// Time to move `remaining` bytes at the smoothed rate.
    ///
    /// `None` until enough samples have been seen or while the rate is zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        if self.samples < MIN_SAMPLES {
            return None;
        }
        let rate = self.smoothed.filter(|r| *r > 0.0)?;
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_is_indeterminate_at_first() {
        let mut est = RateEstimator::default();
        assert_eq!(est.eta(1000), None);
        assert_eq!(est.sample(1000, Duration::from_secs(1)), Some(1000));
        assert_eq!(est.eta(1000), None);
        est.sample(1000, Duration::from_secs(1));
        let eta = est.eta(2000).unwrap();
        assert!(eta > Duration::from_millis(1990) && eta < Duration::from_millis(2010));
    }

    #[test]
    fn test_zero_elapsed_is_ignored() {
        let mut est = RateEstimator::default();
        assert_eq!(est.sample(4096, Duration::ZERO), None);
        assert_eq!(est.rate(), None);
    }

    #[test]
    fn test_smoothing_moves_towards_new_rate() {
        let mut est = RateEstimator::default();
        est.sample(1000, Duration::from_secs(1));
        est.sample(2000, Duration::from_secs(1));
        let rate = est.rate().unwrap();
        assert!((1299..=1300).contains(&rate), "{rate}");
    }
}
