//! Command handlers and the shared session context they run in.

pub mod devices;
pub mod login;
pub mod logout;
pub mod send;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use tether_api::{HttpEndpoint, TlsMode, TransportConfig};
use tether_config::{
    Config, Defaults, Profile, blob_store, config_path, endpoint_url, load_config_or_default,
    profile_to_session_config, profile_to_transport,
};
use tether_core::{BlobStore, Session, SessionConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything a command needs to build an endpoint and a session.
pub struct Context {
    pub profile_name: String,
    pub username: Option<String>,
    pub url: Url,
    pub transport: TransportConfig,
    pub session: SessionConfig,
    pub blobs: Arc<dyn BlobStore>,
}

impl Context {
    /// Resolve the active profile and apply CLI overrides.
    ///
    /// Without a matching profile, `--url` alone is enough; defaults fill
    /// in the rest.
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let cfg: Config = load_config_or_default();
        let fallback = Profile::default();

        let (profile_name, profile) = match cfg.profile(global.profile.as_deref()) {
            Ok((name, profile)) => (name, profile),
            Err(_) if global.url.is_some() => (
                global.profile.clone().unwrap_or_else(|| "default".into()),
                &fallback,
            ),
            Err(_) => {
                if let Some(ref name) = global.profile {
                    return Err(CliError::Validation {
                        field: "profile".into(),
                        reason: format!("no profile named '{name}'"),
                    });
                }
                return Err(CliError::NoConfig {
                    path: config_path().display().to_string(),
                });
            }
        };

        let url = match global.url {
            Some(ref raw) => raw.parse().map_err(|_| CliError::Validation {
                field: "url".into(),
                reason: format!("invalid URL: {raw}"),
            })?,
            None => endpoint_url(profile)?,
        };

        let defaults: &Defaults = &cfg.defaults;
        let mut transport = profile_to_transport(profile, defaults);
        let mut session = profile_to_session_config(profile, &profile_name, defaults)?;
        if global.insecure {
            transport.tls = TlsMode::DangerAcceptInvalid;
        }
        if let Some(secs) = global.timeout {
            transport.timeout = Duration::from_secs(secs);
            session.request_timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            username: profile.username.clone(),
            blobs: blob_store(profile, defaults),
            profile_name,
            url,
            transport,
            session,
        })
    }

    pub fn endpoint(&self) -> Result<HttpEndpoint, CliError> {
        Ok(HttpEndpoint::new(self.url.clone(), &self.transport)?)
    }

    /// A session that has passed its login check. Nothing is started.
    pub async fn authenticated_session(
        &self,
        push: bool,
    ) -> Result<Session<HttpEndpoint>, CliError> {
        let mut config = self.session.clone();
        config.push_enabled = config.push_enabled && push;
        let session = Session::new(config, self.endpoint()?, Arc::clone(&self.blobs));
        session.login_check().await?;
        Ok(session)
    }
}

/// Parse a command-line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_parse_as_json_first() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value(r#"{"bass":1}"#), json!({ "bass": 1 }));
        assert_eq!(parse_value("kitchen"), json!("kitchen"));
    }
}
