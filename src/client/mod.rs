// Daemon API client
//
// Provides DaemonClient for talking to a local or remote build daemon,
// the transport builder behind it, and the DaemonPing seam used by the
// readiness poller.

mod daemon_client;
pub mod transport;

pub use daemon_client::{DaemonClient, DaemonPing, ServerVersion, CLIENT_API_VERSION};
pub use transport::{basic_auth, RawResponse, Transport, TransportOptions};
