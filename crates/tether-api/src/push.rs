//! Push-channel event decoding.
//!
//! The endpoint pushes JSON envelopes of the shape
//! `{ "command": "PUSH_VOLUME_CHANGE", "payload": "{...}", "timeStamp": 1575296436150 }`.
//! The payload is usually a JSON document serialized into a string, but a
//! plain object is accepted too. Every envelope is decoded exactly once
//! into a [`PushEvent`] here; nothing downstream matches on command strings.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::Error;
use crate::models::{DetailKind, DeviceId};

/// Payload attribute carrying the device volume (0-100).
pub const ATTR_VOLUME: &str = "volume";
/// Payload attribute carrying `{ bass, midrange, treble }`.
pub const ATTR_EQUALIZER: &str = "equalizer";

// ── PushEvent ────────────────────────────────────────────────────────

/// A decoded asynchronous notification from the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A single attribute changed and the new value travels with the event.
    /// Subject to echo suppression.
    AttributeChanged {
        device: DeviceId,
        attribute: String,
        value: Value,
    },
    /// Something changed, but the event only names the resource. The
    /// receiver has to fetch it.
    DeviceRefreshNeeded { device: DeviceId, kind: DetailKind },
    /// An activity record exists. Only the correlation key is pushed.
    ActivityPushed {
        device: DeviceId,
        key: String,
        timestamp: DateTime<Utc>,
    },
    /// Device connectivity (bluetooth, link) changed. Worth a full refresh.
    ConnectivityChanged { device: Option<DeviceId> },
    /// Account-wide alarm/reminder/timer list changed.
    NotificationsChanged,
    /// A command this decoder does not know.
    Unknown { command: String },
}

impl PushEvent {
    /// Device this event concerns, if it is device-scoped.
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::AttributeChanged { device, .. }
            | Self::DeviceRefreshNeeded { device, .. }
            | Self::ActivityPushed { device, .. } => Some(device),
            Self::ConnectivityChanged { device } => device.as_ref(),
            Self::NotificationsChanged | Self::Unknown { .. } => None,
        }
    }
}

// ── Wire envelope ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    command: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, rename = "timeStamp")]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DopplerId {
    device_serial_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevicePayload {
    #[serde(default)]
    doppler_id: Option<DopplerId>,
    #[serde(default)]
    volume_setting: Option<i64>,
    #[serde(default)]
    is_muted: bool,
    #[serde(default)]
    bass: Option<i64>,
    #[serde(default)]
    midrange: Option<i64>,
    #[serde(default)]
    treble: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityKey {
    entry_id: String,
}

#[derive(Debug, Deserialize)]
struct ActivityPayload {
    key: ActivityKey,
    #[serde(default)]
    timestamp: Option<i64>,
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Decode one text frame from the push channel.
///
/// Unknown commands decode successfully to [`PushEvent::Unknown`]. Malformed
/// JSON, or a device-scoped command without a device id, is an error.
pub fn decode(text: &str) -> Result<PushEvent, Error> {
    let envelope: PushEnvelope =
        serde_json::from_str(text).map_err(|e| Error::PushDecode(e.to_string()))?;
    let payload = unwrap_payload(envelope.payload)?;
    let timestamp = envelope.timestamp;

    let event = match envelope.command.as_str() {
        "PUSH_VOLUME_CHANGE" => {
            let p = device_payload(&payload)?;
            let device = require_device(p.doppler_id.as_ref(), &envelope.command)?;
            // A muted device reports its pre-mute setting; surface it as 0.
            let volume = if p.is_muted {
                0
            } else {
                p.volume_setting.unwrap_or_default()
            };
            PushEvent::AttributeChanged {
                device,
                attribute: ATTR_VOLUME.into(),
                value: json!(volume),
            }
        }
        "PUSH_EQUALIZER_STATE_CHANGE" => {
            let p = device_payload(&payload)?;
            let device = require_device(p.doppler_id.as_ref(), &envelope.command)?;
            PushEvent::AttributeChanged {
                device,
                attribute: ATTR_EQUALIZER.into(),
                value: json!({
                    "bass": p.bass.unwrap_or_default(),
                    "midrange": p.midrange.unwrap_or_default(),
                    "treble": p.treble.unwrap_or_default(),
                }),
            }
        }
        "PUSH_AUDIO_PLAYER_STATE"
        | "PUSH_MEDIA_QUEUE_CHANGE"
        | "PUSH_MEDIA_CHANGE"
        | "PUSH_MEDIA_PROGRESS_CHANGE"
        | "PUSH_CONTENT_FOCUS_CHANGE" => {
            let p = device_payload(&payload)?;
            let device = require_device(p.doppler_id.as_ref(), &envelope.command)?;
            PushEvent::DeviceRefreshNeeded {
                device,
                kind: DetailKind::Player,
            }
        }
        "PUSH_BLUETOOTH_STATE_CHANGE" | "PUSH_DOPPLER_CONNECTION_CHANGE" => {
            let device = device_payload(&payload)
                .ok()
                .and_then(|p| p.doppler_id)
                .map(|d| DeviceId::from(d.device_serial_number));
            PushEvent::ConnectivityChanged { device }
        }
        "PUSH_NOTIFICATION_CHANGE" => PushEvent::NotificationsChanged,
        "PUSH_ACTIVITY" => {
            let p: ActivityPayload = serde_json::from_value(payload)
                .map_err(|e| Error::PushDecode(format!("PUSH_ACTIVITY: {e}")))?;
            let key = p.key.entry_id;
            let Some(serial) = key.rsplit('#').next().filter(|s| !s.is_empty()) else {
                return Err(Error::PushDecode(format!(
                    "PUSH_ACTIVITY key without device: {key}"
                )));
            };
            let device = DeviceId::from(serial);
            let millis = p.timestamp.or(timestamp);
            PushEvent::ActivityPushed {
                device,
                key,
                timestamp: millis
                    .and_then(DateTime::from_timestamp_millis)
                    .unwrap_or_else(Utc::now),
            }
        }
        other => PushEvent::Unknown {
            command: other.to_owned(),
        },
    };

    Ok(event)
}

/// Payloads arrive either as an object or as a JSON document in a string.
fn unwrap_payload(payload: Value) -> Result<Value, Error> {
    match payload {
        Value::String(s) if s.trim_start().starts_with('{') => {
            serde_json::from_str(&s).map_err(|e| Error::PushDecode(format!("payload: {e}")))
        }
        Value::String(_) | Value::Null => Ok(Value::Object(serde_json::Map::new())),
        other => Ok(other),
    }
}

fn device_payload(payload: &Value) -> Result<DevicePayload, Error> {
    DevicePayload::deserialize(payload).map_err(|e| Error::PushDecode(e.to_string()))
}

fn require_device(doppler: Option<&DopplerId>, command: &str) -> Result<DeviceId, Error> {
    doppler
        .map(|d| DeviceId::from(d.device_serial_number.as_str()))
        .ok_or_else(|| Error::PushDecode(format!("{command} without dopplerId")))
}

// ── Tests ────────────────────────────────────────────────────────────
