// Daemon mode selection
//
// DaemonType is the flag set taken from user input (two booleans).
// DaemonMode is the single outcome chosen once the local handshake is done.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Which daemons the user allows us to try
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DaemonType: u8 {
        const LOCAL = 1 << 0;
        const REMOTE = 1 << 1;
        const NONE = 1 << 2;
    }
}

impl DaemonType {
    /// Build from the two user-facing switches
    pub fn new(allow_local: bool, allow_remote: bool) -> Self {
        let mut daemon_type = DaemonType::empty();
        if allow_local {
            daemon_type |= DaemonType::LOCAL;
        }
        if allow_remote {
            daemon_type |= DaemonType::REMOTE;
        }
        if daemon_type.is_empty() {
            daemon_type = DaemonType::NONE;
        }
        daemon_type
    }

    pub fn allow_local(self) -> bool {
        self.intersects(DaemonType::LOCAL)
    }

    pub fn allow_remote(self) -> bool {
        self.intersects(DaemonType::REMOTE)
    }

    pub fn allow_none(self) -> bool {
        self.intersects(DaemonType::NONE)
    }

    pub fn is_local(self) -> bool {
        self == DaemonType::LOCAL
    }

    pub fn is_remote(self) -> bool {
        self == DaemonType::REMOTE
    }

    pub fn is_none(self) -> bool {
        self == DaemonType::NONE
    }

    pub fn is_available(self) -> bool {
        !self.is_none()
    }
}

/// The daemon a factory ended up bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonMode {
    Local,
    Remote,
    Unavailable,
}

impl DaemonMode {
    pub fn name(&self) -> &'static str {
        match self {
            DaemonMode::Local => "local",
            DaemonMode::Remote => "remote",
            DaemonMode::Unavailable => "unavailable",
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, DaemonMode::Unavailable)
    }
}

impl fmt::Display for DaemonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_is_unavailable() {
        let t = DaemonType::new(false, false);
        assert!(t.is_none());
        assert!(t.allow_none());
        assert!(!t.is_available());
        assert!(!t.allow_local());
        assert!(!t.allow_remote());
    }

    #[test]
    fn test_local_only() {
        let t = DaemonType::new(true, false);
        assert!(t.allow_local());
        assert!(!t.allow_remote());
        assert!(t.is_available());
        assert!(t.is_local());
        assert!(!t.allow_none());
    }

    #[test]
    fn test_both_allowed() {
        let t = DaemonType::new(true, true);
        assert!(t.allow_local());
        assert!(t.allow_remote());
        assert!(!t.allow_none());
        assert!(t.is_available());
        assert!(!t.is_remote());
        assert!(!t.is_local());
    }

    #[test]
    fn test_exclusive_predicates_on_raw_flags() {
        assert!(DaemonType::LOCAL.is_local());
        assert!(DaemonType::REMOTE.is_remote());
        assert!(DaemonType::NONE.is_none());
        assert!(!DaemonType::REMOTE.allow_local());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(DaemonMode::Remote.to_string(), "remote");
        assert!(!DaemonMode::Unavailable.is_available());
    }
}
