//! Connection identity and lifecycle states.
use std::time::Duration;

pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    ListeningClient,
    OutboundCentrald,
    PeerDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Connected,
    AuthPending,
    AuthOk,
    AuthFailed,
    Broken,
    Delete,
}

impl ConnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnState::AuthFailed | ConnState::Broken | ConnState::Delete)
    }

    /// Progress rank along the normal (non-terminal) lifecycle, used for
    /// "at least state X" filters. Terminal states never satisfy such a
    /// filter regardless of where they'd otherwise sort.
    fn rank(self) -> u8 {
        match self {
            ConnState::Connecting => 0,
            ConnState::Connected => 1,
            ConnState::AuthPending => 2,
            ConnState::AuthOk => 3,
            ConnState::AuthFailed | ConnState::Broken | ConnState::Delete => 255,
        }
    }

    /// True if `self` is at least as advanced as `min`, per the normal
    /// lifecycle order (terminal states never satisfy this).
    pub fn at_least(self, min: ConnState) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.rank() >= min.rank()
    }
}

/// Per-kind idle-timeout constants (spec.md §5).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const CENTRALD_PREAUTH_TIMEOUT: Duration = Duration::from_secs(60);
pub const CONNECTING_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const INTEREST_RETRY_INTERVAL: Duration = Duration::from_secs(30);
