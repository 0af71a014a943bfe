// ── Runtime session configuration ──
//
// Timing windows and fetch policy for one `Session`. Never touches disk;
// callers (CLI, tether-config) build a `SessionConfig` and hand it in.

use std::time::Duration;

use tether_api::DetailKind;
use url::Url;

/// Configuration for one device session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Stable id of this session. Keys the persisted blob and appears in
    /// the login URL.
    pub session_id: String,
    /// How often the login check runs. First run is immediate.
    pub login_check_interval: Duration,
    /// How often a full data refresh runs.
    pub data_refresh_interval: Duration,
    /// Offset of the first data refresh from the first login check.
    pub refresh_stagger: Duration,
    /// Force-refresh requests within this window coalesce.
    pub force_refresh_debounce: Duration,
    /// Default lifetime of an echo suppression.
    pub suppression_ttl: Duration,
    /// Upper bound on every remote call.
    pub request_timeout: Duration,
    /// Detail kinds fetched per device on each full refresh.
    pub auxiliary_details: Vec<DetailKind>,
    /// Fetch the account-wide notification list on each full refresh.
    pub fetch_notifications: bool,
    /// Activity lookback window before a pushed activity timestamp.
    pub activity_lookback: Duration,
    /// Activity window after a pushed activity timestamp.
    pub activity_lookahead: Duration,
    pub activity_limit: usize,
    /// Open the push channel once authenticated.
    pub push_enabled: bool,
    /// Base of the external login flow. The session id is appended.
    pub login_url_base: Url,
}

/// Where the external login flow is served when nothing else is configured.
pub const DEFAULT_LOGIN_URL_BASE: &str = "http://localhost:8080/tether/";

impl SessionConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// URL of the external login flow for this session.
    pub fn login_url(&self) -> Url {
        let mut url = self.login_url_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.session_id);
        }
        url
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: "default".into(),
            login_check_interval: Duration::from_secs(60),
            data_refresh_interval: Duration::from_secs(300),
            refresh_stagger: Duration::from_secs(5),
            force_refresh_debounce: Duration::from_secs(1),
            suppression_ttl: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            auxiliary_details: vec![
                DetailKind::Bluetooth,
                DetailKind::Volume,
                DetailKind::NotificationState,
            ],
            fetch_notifications: true,
            activity_lookback: Duration::from_secs(120),
            activity_lookahead: Duration::from_secs(30),
            activity_limit: 10,
            push_enabled: true,
            login_url_base: Url::parse(DEFAULT_LOGIN_URL_BASE)
                .unwrap_or_else(|_| unreachable!("default login URL is valid")),
        }
    }
}
