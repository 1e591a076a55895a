// Health state machine for the readiness poller
//
// Pure bookkeeping: feed it ping outcomes and the current time, get back
// what the poller should do next. No I/O, so it's easy to drive in tests.

use std::time::Duration;
use tokio::time::Instant;

use super::backoff::Backoff;
use crate::config::ReadinessConfig;
use crate::errors::ConnectError;

/// What the poller does after a ping resolves
#[derive(Debug)]
pub enum PollDecision {
    /// Healthy for longer than the stability window
    Ready,
    /// Sleep this long, then ping again
    Retry(Duration),
    /// Terminal failure
    Abort(ConnectError),
}

#[derive(Debug, Clone)]
pub struct HealthState {
    consecutive_successes: u32,
    healthy_start: Option<Instant>,
    stability_window: Duration,
    backoff: Backoff,
}

impl HealthState {
    pub fn new(config: &ReadinessConfig) -> Self {
        Self {
            consecutive_successes: 0,
            healthy_start: None,
            stability_window: config.stability_window,
            backoff: Backoff::from_config(config),
        }
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn healthy_start(&self) -> Option<Instant> {
        self.healthy_start
    }

    pub fn backoff_attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    pub fn on_success(&mut self, now: Instant) -> PollDecision {
        if self.consecutive_successes == 0 {
            // New streak: space the confirming pings out from the minimum again
            self.healthy_start = Some(now);
            self.backoff.reset();
        }
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);

        let healthy_for = self
            .healthy_start
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        if healthy_for > self.stability_window {
            return PollDecision::Ready;
        }

        PollDecision::Retry(self.backoff.duration())
    }

    pub fn on_failure(&mut self, err: ConnectError) -> PollDecision {
        if !err.is_retryable() {
            return PollDecision::Abort(err);
        }
        self.consecutive_successes = 0;
        self.healthy_start = None;
        PollDecision::Retry(self.backoff.duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReadinessConfig {
        ReadinessConfig {
            jitter: false,
            ..Default::default()
        }
    }

    fn retry_delay(decision: PollDecision) -> Duration {
        match decision {
            PollDecision::Retry(d) => d,
            other => panic!("expected retry, got {:?}", other),
        }
    }

    fn unavailable() -> ConnectError {
        ConnectError::Http {
            status: 503,
            message: "starting".into(),
        }
    }

    #[test]
    fn test_first_success_starts_streak_at_min_backoff() {
        let mut state = HealthState::new(&config());
        let t0 = Instant::now();

        let delay = retry_delay(state.on_success(t0));
        assert_eq!(delay, Duration::from_millis(200));
        assert_eq!(state.consecutive_successes(), 1);
        assert_eq!(state.healthy_start(), Some(t0));
    }

    #[test]
    fn test_ready_only_after_stability_window() {
        let mut state = HealthState::new(&config());
        let t0 = Instant::now();
        state.on_success(t0);

        // Exactly at the window is not enough
        assert!(matches!(
            state.on_success(t0 + Duration::from_secs(3)),
            PollDecision::Retry(_)
        ));
        assert!(matches!(
            state.on_success(t0 + Duration::from_millis(3001)),
            PollDecision::Ready
        ));
    }

    #[test]
    fn test_failing_prefix_keeps_streak_at_zero_and_backoff_non_decreasing() {
        let mut state = HealthState::new(&config());
        let mut prev = Duration::ZERO;

        for _ in 0..25 {
            let delay = retry_delay(state.on_failure(unavailable()));
            assert_eq!(state.consecutive_successes(), 0);
            assert!(delay >= prev);
            assert!(delay <= Duration::from_secs(2));
            prev = delay;
        }
        assert_eq!(prev, Duration::from_secs(2));

        // First success after the failures resets the backoff
        let delay = retry_delay(state.on_success(Instant::now()));
        assert_eq!(delay, Duration::from_millis(200));
        assert_eq!(state.consecutive_successes(), 1);
    }

    #[test]
    fn test_failure_breaks_streak() {
        let mut state = HealthState::new(&config());
        let t0 = Instant::now();
        state.on_success(t0);
        state.on_success(t0 + Duration::from_secs(2));
        state.on_failure(unavailable());

        assert_eq!(state.consecutive_successes(), 0);
        assert!(state.healthy_start().is_none());

        // The window restarts from the next success
        let t1 = t0 + Duration::from_secs(4);
        assert!(matches!(state.on_success(t1), PollDecision::Retry(_)));
        assert_eq!(state.healthy_start(), Some(t1));
    }

    #[test]
    fn test_unauthorized_aborts_regardless_of_streak() {
        let mut state = HealthState::new(&config());
        let t0 = Instant::now();
        for i in 0..10 {
            state.on_success(t0 + Duration::from_millis(i * 100));
        }

        match state.on_failure(ConnectError::Unauthorized) {
            PollDecision::Abort(err) => assert!(err.is_unauthorized()),
            other => panic!("expected abort, got {:?}", other),
        }
    }
}
