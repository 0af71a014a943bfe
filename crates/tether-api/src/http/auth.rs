// Token-based session handling for the HTTP endpoint.
//
// Login trades a username/password for an access + refresh token pair.
// The pair, with its expiry, is what gets persisted as the opaque
// credentials blob. Tokens inside the renewal margin are refreshed before
// use.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::Error;
use crate::http::client::HttpEndpoint;
use crate::models::CredentialsBlob;

/// Persisted token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    pub(crate) fn from_blob(blob: &CredentialsBlob) -> Result<Self, Error> {
        serde_json::from_str(blob.expose()).map_err(|e| Error::InvalidCredentials(e.to_string()))
    }

    pub(crate) fn to_blob(&self) -> Result<CredentialsBlob, Error> {
        serde_json::to_string(self)
            .map(CredentialsBlob::new)
            .map_err(|e| Error::InvalidCredentials(e.to_string()))
    }

    pub(crate) fn needs_renewal(&self, margin: TimeDelta, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// `POST /api/auth/login` and `/api/auth/refresh` response body.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

impl TokenResponse {
    fn into_tokens(self) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + TimeDelta::seconds(self.expires_in),
        }
    }
}

impl HttpEndpoint {
    /// Authenticate with username/password.
    ///
    /// On success the tokens are held by this client and returned as a
    /// blob for the caller to persist.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<CredentialsBlob, Error> {
        let url = self.api_url(&["auth", "login"])?;
        debug!("logging in at {}", url);

        let body = json!({
            "username": username,
            "password": password.expose_secret(),
        });

        let resp = self.http().post(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {body}"),
            });
        }

        let tokens = Self::parse_tokens(resp).await?;
        let blob = tokens.to_blob()?;
        self.set_tokens(Some(tokens));
        debug!("login successful");
        Ok(blob)
    }

    /// Exchange the refresh token for a new pair.
    pub(crate) async fn refresh_tokens(&self) -> Result<TokenSet, Error> {
        let current = self.tokens().ok_or(Error::NotLoggedIn)?;
        let url = self.api_url(&["auth", "refresh"])?;
        debug!("renewing session tokens");

        let resp = self
            .http()
            .post(url)
            .json(&json!({ "refresh_token": current.refresh_token }))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            self.set_tokens(None);
            return Err(Error::SessionExpired);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let tokens = Self::parse_tokens(resp).await?;
        self.set_tokens(Some(tokens.clone()));
        Ok(tokens)
    }

    /// Renew the tokens if they are inside the renewal margin.
    ///
    /// Returns the new blob when a renewal happened.
    pub(crate) async fn renew_if_needed(&self) -> Result<Option<CredentialsBlob>, Error> {
        let current = self.tokens().ok_or(Error::NotLoggedIn)?;
        if !current.needs_renewal(self.renewal_margin(), Utc::now()) {
            return Ok(None);
        }
        let renewed = self.refresh_tokens().await?;
        renewed.to_blob().map(Some)
    }

    /// `GET /api/auth/session`: succeeds while the access token is valid.
    pub(crate) async fn check_session(&self) -> Result<(), Error> {
        let url = self.api_url(&["auth", "session"])?;
        let resp = self.authorized(self.http().get(url))?.send().await?;
        Self::check_status(resp).await.map(drop)
    }

    /// `POST /api/auth/logout`, then forget the tokens regardless of the
    /// outcome.
    pub(crate) async fn end_session(&self) -> Result<(), Error> {
        let url = self.api_url(&["auth", "logout"])?;
        debug!("logging out at {}", url);
        let request = self.authorized(self.http().post(url));
        self.set_tokens(None);
        let resp = request?.send().await?;
        Self::check_status(resp).await.map(drop)
    }

    async fn parse_tokens(resp: reqwest::Response) -> Result<TokenSet, Error> {
        let body = resp.text().await?;
        serde_json::from_str::<TokenResponse>(&body)
            .map(TokenResponse::into_tokens)
            .map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })
    }
}
