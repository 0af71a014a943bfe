//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use tether_config::ConfigError;
use tether_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the endpoint")]
    #[diagnostic(
        code(tether::connection_failed),
        help("Check that the endpoint is running and reachable: {reason}")
    )]
    ConnectionFailed { reason: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(tether::timeout),
        help("Increase timeout with --timeout or check endpoint responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Not logged in")]
    #[diagnostic(code(tether::not_logged_in), help("Run: tether login{profile_flag}"))]
    NotLoggedIn { profile_flag: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(tether::auth_failed),
        help("Stored credentials were rejected. Run: tether login{profile_flag}")
    )]
    AuthFailed {
        message: String,
        profile_flag: String,
    },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(tether::protocol))]
    Protocol { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No endpoint configured")]
    #[diagnostic(
        code(tether::no_config),
        help(
            "Add a profile to {path}\n\
             or pass --url / set TETHER_URL."
        )
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tether::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(tether::config))]
    Config(ConfigError),

    #[error("Credential storage failed: {message}")]
    #[diagnostic(code(tether::persistence))]
    Persistence { message: String },

    #[error("Internal error: {message}")]
    #[diagnostic(code(tether::internal))]
    Internal { message: String },

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::NotLoggedIn { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Attach the active profile to auth errors so the help text is
    /// copy-pasteable.
    pub fn for_profile(self, profile: &str) -> Self {
        let flag = format!(" --profile {profile}");
        match self {
            Self::NotLoggedIn { .. } => Self::NotLoggedIn { profile_flag: flag },
            Self::AuthFailed { message, .. } => Self::AuthFailed {
                message,
                profile_flag: flag,
            },
            other => other,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotAuthenticated => CliError::NotLoggedIn {
                profile_flag: String::new(),
            },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                message,
                profile_flag: String::new(),
            },
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed { reason },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::Unsupported { .. } | CoreError::Protocol { .. } => CliError::Protocol {
                message: err.to_string(),
            },
            CoreError::Persistence { message } => CliError::Persistence { message },
            CoreError::SessionStopped => CliError::Internal {
                message: err.to_string(),
            },
        }
    }
}

impl From<tether_api::Error> for CliError {
    fn from(err: tether_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_exit_with_auth_code() {
        let err: CliError = CoreError::NotAuthenticated.into();
        assert_eq!(err.exit_code(), exit_code::AUTH);

        let err = err.for_profile("home");
        assert!(matches!(err, CliError::NotLoggedIn { ref profile_flag } if profile_flag == " --profile home"));
    }

    #[test]
    fn transport_errors_map_through_core() {
        let err: CliError = tether_api::Error::Api {
            status: 503,
            message: "down".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }
}
