// HTTP endpoint client
//
// Wraps `reqwest::Client` with bearer-token auth, URL construction and
// status mapping. Auth flows live in `auth.rs`; this module holds the
// transport mechanics and the `RemoteEndpoint` implementation.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::endpoint::{PushChannel, RemoteEndpoint};
use crate::error::Error;
use crate::http::auth::TokenSet;
use crate::models::{
    Activity, ActivityQuery, CommandAck, CredentialsBlob, DetailKind, DeviceCommand, DeviceId,
    DeviceSnapshot, Notification,
};
use crate::transport::TransportConfig;
use crate::websocket;

/// Tokens expiring within this window are renewed before use.
const DEFAULT_RENEWAL_MARGIN: TimeDelta = TimeDelta::minutes(5);

/// Device record as listed by `GET /api/devices`.
#[derive(Debug, Deserialize)]
struct DeviceRecord {
    id: DeviceId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    online: bool,
    #[serde(default)]
    state: Value,
}

impl DeviceRecord {
    fn into_snapshot(self, fetched_at: DateTime<Utc>) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id,
            name: self.name,
            family: self.family,
            online: self.online,
            payload: if self.state.is_null() {
                Value::Object(serde_json::Map::new())
            } else {
                self.state
            },
            last_updated_at: fetched_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AckRecord {
    #[serde(default)]
    acknowledged_at: Option<DateTime<Utc>>,
}

/// Token-authenticated JSON REST + WebSocket endpoint.
pub struct HttpEndpoint {
    http: reqwest::Client,
    base_url: Url,
    tokens: RwLock<Option<TokenSet>>,
    renewal_margin: TimeDelta,
}

impl HttpEndpoint {
    /// Create a client for the gateway at `base_url`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            tokens: RwLock::new(None),
            renewal_margin: DEFAULT_RENEWAL_MARGIN,
        }
    }

    /// Override how close to expiry tokens get renewed.
    pub fn with_renewal_margin(mut self, margin: TimeDelta) -> Self {
        self.renewal_margin = margin;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether this client currently holds tokens.
    pub fn is_logged_in(&self) -> bool {
        self.tokens().is_some()
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn renewal_margin(&self) -> TimeDelta {
        self.renewal_margin
    }

    pub(crate) fn tokens(&self) -> Option<TokenSet> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_tokens(&self, tokens: Option<TokenSet>) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = tokens;
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/api/{segments...}`, each segment percent-encoded.
    pub(crate) fn api_url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Attach the bearer token, or fail with `NotLoggedIn`.
    pub(crate) fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, Error> {
        let tokens = self.tokens().ok_or(Error::NotLoggedIn)?;
        Ok(builder.bearer_auth(tokens.access_token))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.authorized(self.http.get(url))?.send().await?;
        Self::parse_json(resp).await
    }

    /// Map auth and non-success statuses to errors.
    pub(crate) async fn check_status(
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "session expired or invalid credentials".into(),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

// ── RemoteEndpoint ───────────────────────────────────────────────────

impl RemoteEndpoint for HttpEndpoint {
    async fn restore_session(&self, blob: &CredentialsBlob) -> Result<CredentialsBlob, Error> {
        let tokens = TokenSet::from_blob(blob)?;
        self.set_tokens(Some(tokens));
        let renewed = self.renew_if_needed().await?;
        self.check_session().await?;
        Ok(renewed.unwrap_or_else(|| blob.clone()))
    }

    async fn verify_session(&self) -> Result<Option<CredentialsBlob>, Error> {
        let renewed = self.renew_if_needed().await?;
        self.check_session().await?;
        Ok(renewed)
    }

    async fn logout(&self) -> Result<(), Error> {
        self.end_session().await
    }

    async fn fetch_device_list(&self) -> Result<Vec<DeviceSnapshot>, Error> {
        let url = self.api_url(&["devices"])?;
        let records: Vec<DeviceRecord> = self.get_json(url).await?;
        let fetched_at = Utc::now();
        Ok(records
            .into_iter()
            .map(|r| r.into_snapshot(fetched_at))
            .collect())
    }

    async fn fetch_device_detail(&self, device: &DeviceId, kind: DetailKind) -> Result<Value, Error> {
        let kind_segment = kind.to_string();
        let url = self.api_url(&["devices", device.as_str(), &kind_segment])?;
        match self.get_json(url).await {
            Err(Error::Api {
                status: 400 | 404 | 501,
                ..
            }) => Err(Error::UnsupportedResource {
                device: device.clone(),
                kind,
            }),
            other => other,
        }
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, Error> {
        let url = self.api_url(&["notifications"])?;
        self.get_json(url).await
    }

    async fn fetch_activities(&self, query: ActivityQuery) -> Result<Vec<Activity>, Error> {
        let mut url = self.api_url(&["activities"])?;
        url.query_pairs_mut()
            .append_pair("start", &query.start.timestamp_millis().to_string())
            .append_pair("end", &query.end.timestamp_millis().to_string())
            .append_pair("limit", &query.limit.to_string());
        self.get_json(url).await
    }

    async fn send_command(
        &self,
        device: &DeviceId,
        command: &DeviceCommand,
    ) -> Result<CommandAck, Error> {
        let url = self.api_url(&["devices", device.as_str(), "commands"])?;
        debug!(device = %device, attribute = %command.attribute, "POST {}", url);

        let resp = self
            .authorized(self.http.post(url))?
            .json(command)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;
        let ack: AckRecord = serde_json::from_str(&body).unwrap_or_default();

        Ok(CommandAck {
            device: device.clone(),
            attribute: command.attribute.clone(),
            value: command.value.clone(),
            acknowledged_at: ack.acknowledged_at.unwrap_or_else(Utc::now),
        })
    }

    async fn open_push_channel(&self) -> Result<Option<PushChannel>, Error> {
        let tokens = self.tokens().ok_or(Error::NotLoggedIn)?;
        let url = websocket::push_url(&self.base_url, "/api/push")?;
        websocket::connect(&url, &tokens.access_token).await.map(Some)
    }
}
