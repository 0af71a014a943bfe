// ── Core error types ──
//
// Session-level errors. Consumers never see HTTP status codes or JSON
// parse failures directly: `From<tether_api::Error>` translates transport
// errors into these variants, and `class()` decides how each one is
// reported through `Status`.

use thiserror::Error;

use tether_api::{DetailKind, DeviceId, ErrorKind};

use crate::status::StatusDetail;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("No credentials available")]
    NotAuthenticated,

    // ── Connection ───────────────────────────────────────────────────
    #[error("Cannot reach endpoint: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Remote call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Session has been stopped")]
    SessionStopped,

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Device {device} does not support {kind}")]
    Unsupported { device: DeviceId, kind: DetailKind },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Collaborators ────────────────────────────────────────────────
    #[error("Credential persistence failed: {message}")]
    Persistence { message: String },
}

/// How a failure is reported and whether the next tick can recover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorClass {
    /// Needs an external re-login.
    Auth,
    /// Auto-recovered by the next poll tick.
    Network,
    /// Unexpected response shape or unsupported resource.
    Protocol,
    /// Bug or unexpected failure inside this process.
    Programming,
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AuthenticationFailed { .. } | Self::NotAuthenticated => ErrorClass::Auth,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => ErrorClass::Network,
            Self::Unsupported { .. } | Self::Protocol { .. } => ErrorClass::Protocol,
            Self::SessionStopped | Self::Persistence { .. } => ErrorClass::Programming,
        }
    }

    /// Status detail to report when this error ends a session-level
    /// operation.
    pub fn status_detail(&self) -> StatusDetail {
        match self {
            Self::NotAuthenticated => StatusDetail::ConfigurationPending,
            Self::AuthenticationFailed { .. } | Self::Persistence { .. } => {
                StatusDetail::ConfigurationError
            }
            _ => StatusDetail::CommunicationError,
        }
    }

    /// Human-readable hint for the status message. Auth and credential
    /// store failures always point at the external login flow.
    pub fn remediation(&self, login_url: &url::Url) -> Option<String> {
        if let Self::Persistence { .. } = self {
            return Some(format!(
                "Check the credential store, then log in again at {login_url}"
            ));
        }
        match self.class() {
            ErrorClass::Auth => Some(format!("Log in again at {login_url}")),
            ErrorClass::Network => Some("Will retry on the next refresh".into()),
            ErrorClass::Protocol | ErrorClass::Programming => None,
        }
    }

    /// Full status message: class, error, and hint.
    pub fn status_message(&self, login_url: &url::Url) -> String {
        let base = format!("{} error: {self}", self.class());
        match self.remediation(login_url) {
            Some(hint) => format!("{base}. {hint}"),
            None => base,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tether_api::Error> for CoreError {
    fn from(err: tether_api::Error) -> Self {
        match err {
            tether_api::Error::UnsupportedResource { device, kind } => {
                CoreError::Unsupported { device, kind }
            }
            tether_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            tether_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            tether_api::Error::NotLoggedIn => CoreError::NotAuthenticated,
            other => match other.kind() {
                ErrorKind::Auth => CoreError::AuthenticationFailed {
                    message: other.to_string(),
                },
                ErrorKind::Network => CoreError::ConnectionFailed {
                    reason: other.to_string(),
                },
                ErrorKind::Protocol => CoreError::Protocol {
                    message: other.to_string(),
                },
            },
        }
    }
}

// ── Handler errors ───────────────────────────────────────────────────

/// Failure reported by a [`DependentHandler`](crate::DependentHandler)
/// callback. Logged at the fan-out boundary, never propagated.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CoreError> for HandlerError {
    fn from(err: CoreError) -> Self {
        Self::new(err.to_string())
    }
}
