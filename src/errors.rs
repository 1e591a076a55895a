// Connection error taxonomy and user-friendly error messages
//
// ConnectError classifies every failure the connection factory can surface.
// The helpers below turn the terminal ones into actionable messages.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while acquiring a daemon connection
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Mode is none, or every allowed mode was exhausted
    #[error("no docker daemon available")]
    NoDaemonAvailable,

    /// Local daemon handshake failed
    #[error("local docker daemon unavailable: {0}")]
    LocalUnavailable(String),

    /// Provisioning collaborator failed
    #[error("could not create remote builder: {0}")]
    ProvisioningFailed(String),

    #[error("error parsing remote builder url {url:?}: {reason}")]
    InvalidBuilderUrl { url: String, reason: String },

    #[error("error creating docker client: {0}")]
    ClientBuild(String),

    /// Instance-status collaborator failed
    #[error("error waiting for remote builder app: {0}")]
    InstanceWait(String),

    #[error("remote builder app unavailable: {app} did not start on time")]
    InstanceNotRunning { app: String },

    /// The only terminal, non-retryable ping failure
    #[error("You are unauthorized to use this builder")]
    Unauthorized,

    #[error("Could not ping remote builder within {}, aborting.", format_wait(.0))]
    ReadinessTimeout(Duration),

    /// Caller-initiated abort, not a failure
    #[error("canceled")]
    Canceled,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// HTTP protocol failure on the local daemon socket
    #[error("docker socket error: {0}")]
    Socket(#[from] hyper::Error),

    #[error("daemon responded with {status}: {message}")]
    Http { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ConnectError::Unauthorized)
    }

    /// Everything except an authorization failure may be retried by the poller
    pub fn is_retryable(&self) -> bool {
        !self.is_unauthorized()
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ConnectError::Canceled)
    }

    /// True when the error means "nothing is listening there"
    ///
    /// Refused connections, missing sockets and unresolvable hosts all count;
    /// anything else (permissions, protocol errors) does not.
    pub fn is_connection_failed(&self) -> bool {
        match self {
            ConnectError::Transport(e) => e.is_connect(),
            ConnectError::Socket(e) => e.is_connect(),
            ConnectError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::AddrNotAvailable
            ),
            _ => false,
        }
    }
}

fn format_wait(d: &Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let mins = secs / 60;
        format!("{} minute{}", mins, if mins == 1 { "" } else { "s" })
    } else {
        format!("{:?}", d)
    }
}

/// Format a remote builder startup timeout with the log command to check
pub fn builder_not_started_error(app_name: &str) -> String {
    format!(
        "Remote builder did not start on time.\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Check remote builder logs:\n\
           \x1b[36mflyctl logs -a {}\x1b[0m",
        app_name
    )
}

/// Format an unauthorized error with helpful suggestions
pub fn unauthorized_error(app_name: &str) -> String {
    format!(
        "You are unauthorized to use the builder for {}\n\n\
        \x1b[1;33mPossible causes:\x1b[0m\n\
        • API token missing or expired\n\
        • Token belongs to a different organization\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Log in again:\n\
           \x1b[36mflyctl auth login\x1b[0m\n\n\
        2. Or export a token:\n\
           \x1b[36mexport FLY_API_TOKEN=...\x1b[0m",
        app_name
    )
}

/// Wrap a generic error with suggestions
pub fn wrap_error_with_suggestion(error: impl fmt::Display, suggestion: &str) -> String {
    format!("{}\n\n\x1b[1;33mSuggestion:\x1b[0m {}", error, suggestion)
}

/// Pick the user-facing rendering of a terminal acquisition error
pub fn user_message(err: &ConnectError, app_name: &str) -> String {
    match err {
        ConnectError::InstanceNotRunning { app } => builder_not_started_error(app),
        ConnectError::Unauthorized => unauthorized_error(app_name),
        ConnectError::ReadinessTimeout(_) => wrap_error_with_suggestion(
            err,
            "The builder may still be booting. Retry, or check its logs with `flyctl logs`.",
        ),
        ConnectError::NoDaemonAvailable => wrap_error_with_suggestion(
            err,
            "Start a local docker daemon or allow the remote builder.",
        ),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unauthorized_is_terminal() {
        assert!(!ConnectError::Unauthorized.is_retryable());
        assert!(ConnectError::Http {
            status: 500,
            message: "boom".into()
        }
        .is_retryable());
        assert!(ConnectError::ReadinessTimeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_timeout_message_names_minutes() {
        let msg = ConnectError::ReadinessTimeout(Duration::from_secs(300)).to_string();
        assert_eq!(msg, "Could not ping remote builder within 5 minutes, aborting.");
    }

    #[test]
    fn test_io_refused_is_connection_failure() {
        let err = ConnectError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(err.is_connection_failed());

        let denied = ConnectError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!denied.is_connection_failed());
    }

    #[test]
    fn test_not_started_message_suggests_logs() {
        let msg = builder_not_started_error("fly-builder-123");
        assert!(msg.contains("flyctl logs -a fly-builder-123"));
    }

    #[test]
    fn test_provisioning_message_names_stage() {
        let err = ConnectError::ProvisioningFailed("boom".into());
        assert!(err.to_string().starts_with("could not create remote builder"));
    }
}
