// Daemon readiness
//
// Decides when a freshly built remote daemon can take builds.

pub mod backoff;
pub mod health;
pub mod poller;

pub use backoff::Backoff;
pub use health::{HealthState, PollDecision};
pub use poller::{PollOutcome, ReadinessPoller};
