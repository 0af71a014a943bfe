//! Shared configuration for tether.
//!
//! TOML profiles merged with `TETHER_` environment variables, translation
//! to `tether_core::SessionConfig` and `tether_api::TransportConfig`, and
//! the durable credential blob stores.

mod blob_store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use tether_api::{DetailKind, TlsMode, TransportConfig};
use tether_core::{BlobStore, SessionConfig};

pub use blob_store::{FileBlobStore, KEYRING_SERVICE, KeyringBlobStore};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no username configured for profile '{profile}'")]
    NoUsername { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named endpoint profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

/// Where the credentials blob is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStore {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_push")]
    pub push: bool,

    #[serde(default)]
    pub credential_store: CredentialStore,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: default_timeout(),
            push: default_push(),
            credential_store: CredentialStore::default(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}
fn default_push() -> bool {
    true
}

/// A named endpoint profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Endpoint base URL (e.g., "https://gateway.local").
    pub url: String,

    /// Session id. Defaults to the profile name.
    pub session_id: Option<String>,

    /// Username for `tether login`.
    pub username: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Override push-channel enablement.
    pub push: Option<bool>,

    /// Override credential store.
    pub credential_store: Option<CredentialStore>,

    /// Base URL of the external login flow.
    pub login_url: Option<String>,

    /// Detail kinds fetched on every refresh.
    pub auxiliary_details: Option<Vec<DetailKind>>,

    pub activity_limit: Option<usize>,

    /// Session windows, humantime-formatted ("90s", "5m").
    #[serde(default)]
    pub intervals: Intervals,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Intervals {
    pub login_check: Option<String>,
    pub data_refresh: Option<String>,
    pub refresh_stagger: Option<String>,
    pub force_refresh_debounce: Option<String>,
    pub suppression_ttl: Option<String>,
    pub activity_lookback: Option<String>,
    pub activity_lookahead: Option<String>,
}

impl Config {
    /// Resolve a profile by explicit name, then `default_profile`, then
    /// "default".
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => Err(ConfigError::UnknownProfile { profile: name }),
        }
    }
}

// ── Config paths ────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("rs", "tether", "tether")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory for file-backed credential blobs.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("data"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tether");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, then `TETHER_` environment variables.
///
/// Nested keys use a double underscore:
/// `TETHER_PROFILES__HOME__URL=https://...`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TETHER_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Parse and validate the profile's endpoint URL.
pub fn endpoint_url(profile: &Profile) -> Result<Url, ConfigError> {
    profile.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })
}

/// Username from the profile, falling back to `TETHER_USERNAME`.
pub fn resolve_username(profile: &Profile, profile_name: &str) -> Result<String, ConfigError> {
    profile
        .username
        .clone()
        .or_else(|| std::env::var("TETHER_USERNAME").ok())
        .ok_or_else(|| ConfigError::NoUsername {
            profile: profile_name.into(),
        })
}

/// Build the HTTP transport settings for a profile.
pub fn profile_to_transport(profile: &Profile, defaults: &Defaults) -> TransportConfig {
    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    }
}

/// Build a `SessionConfig` from a profile. Unset windows keep the core
/// defaults.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let session_id = profile
        .session_id
        .clone()
        .unwrap_or_else(|| profile_name.to_owned());
    let mut config = SessionConfig::new(session_id);

    config.request_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.push_enabled = profile.push.unwrap_or(defaults.push);

    if let Some(ref login_url) = profile.login_url {
        config.login_url_base = login_url.parse().map_err(|_| ConfigError::Validation {
            field: "login_url".into(),
            reason: format!("invalid URL: {login_url}"),
        })?;
    }
    if let Some(ref kinds) = profile.auxiliary_details {
        config.auxiliary_details.clone_from(kinds);
    }
    if let Some(limit) = profile.activity_limit {
        config.activity_limit = limit;
    }

    let intervals = &profile.intervals;
    let windows = [
        ("login_check", &intervals.login_check, &mut config.login_check_interval),
        ("data_refresh", &intervals.data_refresh, &mut config.data_refresh_interval),
        ("refresh_stagger", &intervals.refresh_stagger, &mut config.refresh_stagger),
        (
            "force_refresh_debounce",
            &intervals.force_refresh_debounce,
            &mut config.force_refresh_debounce,
        ),
        ("suppression_ttl", &intervals.suppression_ttl, &mut config.suppression_ttl),
        ("activity_lookback", &intervals.activity_lookback, &mut config.activity_lookback),
        ("activity_lookahead", &intervals.activity_lookahead, &mut config.activity_lookahead),
    ];
    for (field, raw, target) in windows {
        if let Some(raw) = raw {
            *target = parse_window(field, raw)?;
        }
    }

    if config.login_check_interval.is_zero() || config.data_refresh_interval.is_zero() {
        return Err(ConfigError::Validation {
            field: "intervals".into(),
            reason: "login_check and data_refresh must be greater than zero".into(),
        });
    }

    Ok(config)
}

fn parse_window(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::Validation {
        field: format!("intervals.{field}"),
        reason: format!("'{raw}': {e}"),
    })
}

/// Open the credential store a profile asks for.
pub fn blob_store(profile: &Profile, defaults: &Defaults) -> Arc<dyn BlobStore> {
    match profile.credential_store.unwrap_or(defaults.credential_store) {
        CredentialStore::File => Arc::new(FileBlobStore::new(data_dir())),
        CredentialStore::Keyring => Arc::new(KeyringBlobStore::new(KEYRING_SERVICE)),
    }
}
