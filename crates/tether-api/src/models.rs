// Wire-level domain types shared by every endpoint implementation.
//
// The session layer treats `DeviceSnapshot::payload` and detail values as
// opaque JSON; only identifiers, timestamps and the online flag carry
// meaning outside the protocol.

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── DeviceId ─────────────────────────────────────────────────────────

/// Stable device identifier (serial number, MAC or UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── DeviceSnapshot ───────────────────────────────────────────────────

/// Last-known remote state for one physical device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    pub online: bool,
    /// Protocol-specific state. Opaque to the session layer.
    #[serde(default)]
    pub payload: Value,
    pub last_updated_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    pub fn new(id: impl Into<DeviceId>, online: bool) -> Self {
        Self {
            id: id.into(),
            name: None,
            family: None,
            online,
            payload: Value::Object(serde_json::Map::new()),
            last_updated_at: Utc::now(),
        }
    }

    /// Copy of this snapshot with one payload attribute replaced.
    ///
    /// A non-object payload is replaced by an object holding only the
    /// patched attribute.
    pub fn with_attribute(&self, attribute: &str, value: Value) -> Self {
        let mut next = self.clone();
        if !next.payload.is_object() {
            next.payload = Value::Object(serde_json::Map::new());
        }
        if let Some(map) = next.payload.as_object_mut() {
            map.insert(attribute.to_owned(), value);
        }
        next.last_updated_at = Utc::now();
        next
    }

    /// Read one payload attribute, if present.
    pub fn attribute(&self, attribute: &str) -> Option<&Value> {
        self.payload.get(attribute)
    }
}

// ── DetailKind ───────────────────────────────────────────────────────

/// Targeted per-device resources fetched alongside the device list.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DetailKind {
    Player,
    Volume,
    Bluetooth,
    Equalizer,
    NotificationState,
    DoNotDisturb,
}

// ── Commands ─────────────────────────────────────────────────────────

/// A side-effecting request to change one attribute on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub attribute: String,
    pub value: Value,
}

impl DeviceCommand {
    pub fn new(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// Endpoint acknowledgement of a [`DeviceCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub device: DeviceId,
    pub attribute: String,
    pub value: Value,
    pub acknowledged_at: DateTime<Utc>,
}

// ── Activities ───────────────────────────────────────────────────────

/// One record from the account's activity history (voice transcripts,
/// spoken responses).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Correlation key. Ends with the originating device id.
    pub key: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

impl Activity {
    /// Whether this record originated from `device`.
    pub fn belongs_to(&self, device: &DeviceId) -> bool {
        self.key.ends_with(device.as_str())
    }
}

/// Bounded lookback window for [`Activity`] fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: usize,
}

// ── Notifications ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    Alarm,
    MusicAlarm,
    Reminder,
    Timer,
    #[serde(other)]
    Other,
}

/// A scheduled alarm, reminder or timer on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub device: DeviceId,
    pub kind: NotificationKind,
    pub next_at: DateTime<Utc>,
}

// ── Credentials ──────────────────────────────────────────────────────

/// Opaque, serializable session credentials.
///
/// Persisted verbatim by the session layer; only the endpoint that
/// produced it knows its structure.
#[derive(Clone)]
pub struct CredentialsBlob(SecretString);

impl CredentialsBlob {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    /// The raw serialized form, for persistence.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for CredentialsBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialsBlob([REDACTED])")
    }
}

impl PartialEq for CredentialsBlob {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}
