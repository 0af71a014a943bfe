// ── Observable session state ──
//
// Host-facing status (state + machine-readable detail + human message),
// plus the internal connection and push-channel state machines. All three
// are published through `watch` channels by `Session`.

use std::fmt;

/// Coarse availability reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ThingStatus {
    Online,
    Offline,
    Unknown,
}

/// Machine-readable reason attached to a [`ThingStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusDetail {
    None,
    /// Waiting on an external login flow.
    ConfigurationPending,
    /// Credentials were rejected.
    ConfigurationError,
    /// Connectivity or protocol failure. The next tick retries.
    CommunicationError,
    BridgeOffline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub status: ThingStatus,
    pub detail: StatusDetail,
    pub message: Option<String>,
}

impl Status {
    pub fn online() -> Self {
        Self {
            status: ThingStatus::Online,
            detail: StatusDetail::None,
            message: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            status: ThingStatus::Unknown,
            detail: StatusDetail::None,
            message: None,
        }
    }

    pub fn offline(detail: StatusDetail, message: impl Into<String>) -> Self {
        Self {
            status: ThingStatus::Offline,
            detail,
            message: Some(message.into()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ThingStatus::Online
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if self.detail != StatusDetail::None {
            write!(f, " ({})", self.detail)?;
        }
        if let Some(ref message) = self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    /// Authenticated, but the last data fetch failed.
    Degraded,
}

impl ConnectionState {
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::Degraded)
    }
}

/// Push-channel state: `Closed -> Connecting -> Open -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PushState {
    Closed,
    Connecting,
    Open,
}
