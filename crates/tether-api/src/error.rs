use thiserror::Error;

use crate::models::{DetailKind, DeviceId};

/// Coarse failure class used by the session layer to pick a status and
/// decide whether the next poll tick will recover on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials invalid or expired. Needs an external re-login.
    Auth,
    /// Connectivity, DNS, TLS or timeout. Recovered by the next tick.
    Network,
    /// Unexpected response shape or unsupported resource.
    Protocol,
}

/// Top-level error type for the `tether-api` crate.
///
/// Covers every failure mode of a remote endpoint: authentication,
/// transport, protocol responses, and the push channel.
/// `tether-core` maps these into session status and user-facing hints.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or token renewal rejected.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Session tokens expired and could not be renewed.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// An authenticated call was made before any session was restored.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The persisted credentials blob could not be parsed.
    #[error("Invalid credentials blob: {0}")]
    InvalidCredentials(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// Non-success response from the endpoint.
    #[error("Endpoint error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The device does not expose the requested resource.
    #[error("Device {device} does not support {kind}")]
    UnsupportedResource { device: DeviceId, kind: DetailKind },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Push channel ────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("Push channel connection failed: {0}")]
    PushConnect(String),

    /// A push frame could not be decoded.
    #[error("Push frame decode failed: {0}")]
    PushDecode(String),
}

impl Error {
    /// Classify this error for status reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. }
            | Self::SessionExpired
            | Self::NotLoggedIn
            | Self::InvalidCredentials(_) => ErrorKind::Auth,
            Self::Transport(e) if e.status().is_some_and(|s| s.as_u16() == 401) => ErrorKind::Auth,
            Self::Transport(_)
            | Self::InvalidUrl(_)
            | Self::Timeout { .. }
            | Self::Tls(_)
            | Self::PushConnect(_) => ErrorKind::Network,
            Self::Api { status: 401 | 403, .. } => ErrorKind::Auth,
            Self::Api { status, .. } if *status >= 500 => ErrorKind::Network,
            Self::Api { .. }
            | Self::UnsupportedResource { .. }
            | Self::Deserialization { .. }
            | Self::PushDecode(_) => ErrorKind::Protocol,
        }
    }

    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::PushConnect(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the device simply lacks the requested resource.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedResource { .. })
    }
}
