// Exponential backoff with optional jitter
//
// Each call to `duration()` returns min * factor^attempt (capped at max) and
// advances the attempt counter. With jitter on, the value is drawn uniformly
// between min and that bound.

use rand::Rng;
use std::time::Duration;

use crate::config::ReadinessConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, factor: f64, jitter: bool) -> Self {
        Self {
            min,
            max: max.max(min),
            factor: if factor > 0.0 { factor } else { 1.0 },
            jitter,
            attempt: 0,
        }
    }

    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self::new(
            config.min_backoff,
            config.max_backoff,
            config.backoff_factor,
            config.jitter,
        )
    }

    /// Next wait, advancing the attempt counter
    pub fn duration(&mut self) -> Duration {
        let d = self.for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        d
    }

    /// Wait for a given attempt without touching state
    pub fn for_attempt(&self, attempt: u32) -> Duration {
        let min = self.min.as_secs_f64();
        let max = self.max.as_secs_f64();

        let mut dur = min * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        if self.jitter && dur > min {
            dur = rand::thread_rng().gen_range(min..dur);
        }

        if !dur.is_finite() || dur > max {
            return self.max;
        }
        if dur < min {
            return self.min;
        }
        Duration::from_secs_f64(dur)
    }

    /// Start over from the minimum
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: bool) -> Backoff {
        Backoff::new(Duration::from_millis(200), Duration::from_secs(2), 1.2, jitter)
    }

    #[test]
    fn test_starts_at_min() {
        let mut b = backoff(false);
        assert_eq!(b.duration(), Duration::from_millis(200));
        assert_eq!(b.attempt(), 1);
    }

    #[test]
    fn test_grows_by_factor_until_capped() {
        let mut b = backoff(false);
        let mut prev = Duration::ZERO;
        for _ in 0..40 {
            let d = b.duration();
            assert!(d >= prev, "{:?} < {:?}", d, prev);
            assert!(d <= Duration::from_secs(2));
            prev = d;
        }
        assert_eq!(prev, Duration::from_secs(2));

        let second = backoff(false).for_attempt(1);
        assert!((second.as_secs_f64() - 0.24).abs() < 1e-9);
    }

    #[test]
    fn test_reset_returns_to_min() {
        let mut b = backoff(false);
        for _ in 0..5 {
            b.duration();
        }
        b.reset();
        assert_eq!(b.duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut b = backoff(true);
        for _ in 0..200 {
            let d = b.duration();
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_huge_attempt_caps_at_max() {
        assert_eq!(backoff(false).for_attempt(u32::MAX), Duration::from_secs(2));
    }
}
