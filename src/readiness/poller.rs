// Readiness poller
//
// Pings a freshly built daemon until it has answered continuously for the
// stability window. Each ping runs as its own task and races the overall
// deadline and the caller's cancellation token.

use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::health::{HealthState, PollDecision};
use crate::client::DaemonPing;
use crate::config::ReadinessConfig;
use crate::errors::ConnectError;

/// How a readiness wait ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    /// The caller canceled; not a failure
    Canceled,
}

pub struct ReadinessPoller {
    config: ReadinessConfig,
}

impl ReadinessPoller {
    pub fn new(config: ReadinessConfig) -> Self {
        Self { config }
    }

    /// Poll until ready, canceled, unauthorized, or past the deadline
    ///
    /// Pings are strictly sequential. A ping still in flight when the loop
    /// exits is canceled through its child token.
    pub async fn wait(
        &self,
        daemon: Arc<dyn DaemonPing>,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, ConnectError> {
        let deadline = Instant::now() + self.config.deadline;
        let mut state = HealthState::new(&self.config);

        loop {
            if cancel.is_cancelled() {
                warn!("Canceled");
                return Ok(PollOutcome::Canceled);
            }
            if Instant::now() >= deadline {
                return Err(ConnectError::ReadinessTimeout(self.config.deadline));
            }

            let ping_token = cancel.child_token();
            // Dropping the guard cancels a ping that lost the race
            let _guard = ping_token.clone().drop_guard();
            let target = daemon.clone();
            let mut ping = tokio::spawn(async move {
                tokio::select! {
                    result = target.ping() => Some(result),
                    _ = ping_token.cancelled() => None,
                }
            });

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    ping.abort();
                    warn!("Canceled");
                    return Ok(PollOutcome::Canceled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    ping.abort();
                    return Err(ConnectError::ReadinessTimeout(self.config.deadline));
                }
                joined = &mut ping => joined,
            };

            let result = match joined {
                Ok(Some(result)) => result,
                // Token canceled under us; the next iteration reports it
                Ok(None) => continue,
                Err(e) => Err(ConnectError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("ping task failed: {}", e),
                ))),
            };

            let decision = match result {
                Ok(()) => state.on_success(Instant::now()),
                Err(err) => {
                    let reason = err.to_string();
                    let decision = state.on_failure(err);
                    if let PollDecision::Retry(delay) = &decision {
                        debug!("Remote builder unavailable, retrying in {:?} (err: {})", delay, reason);
                    }
                    decision
                }
            };

            match decision {
                PollDecision::Ready => {
                    info!(
                        successes = state.consecutive_successes(),
                        "Remote builder is ready to build"
                    );
                    return Ok(PollOutcome::Ready);
                }
                PollDecision::Abort(err) => {
                    warn!(error = %err, "Remote builder rejected readiness check");
                    return Err(err);
                }
                PollDecision::Retry(delay) => {
                    if state.consecutive_successes() > 0 {
                        debug!(
                            "Remote builder available, but pinging again in {:?} to be sure",
                            delay
                        );
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            warn!("Canceled");
                            return Ok(PollOutcome::Canceled);
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            return Err(ConnectError::ReadinessTimeout(self.config.deadline));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
