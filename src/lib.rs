// Remote Builder - daemon connection acquisition and readiness
// Library exports

pub mod client; // Docker Engine API client and transport
pub mod config;
pub mod daemon; // Local/remote mode selection
pub mod errors;
pub mod factory; // Memoized connection factory
pub mod progress;
pub mod readiness; // Backoff + readiness poller
pub mod registry; // Registry auth, tags, Dockerfile lookup
pub mod remote; // Provisioning, instance status, endpoint resolution

pub use errors::ConnectError;
pub use factory::{ConnectionFactory, RemoteDeps};
