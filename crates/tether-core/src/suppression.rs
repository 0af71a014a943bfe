// ── Echo suppression ──
//
// Short-lived markers for commands this process just issued. A pushed
// update that merely confirms one of them is dropped.
//
// Expiry uses `tokio::time::Instant` so paused-clock tests control it.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tether_api::DeviceId;
use tokio::time::Instant;
use tracing::debug;

/// "Ignore echoes of `attribute` on this device until `expires_at` or
/// until `expected` is observed."
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSuppression {
    pub expected: Value,
    pub expires_at: Instant,
}

/// Outcome of checking an inbound attribute change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Apply,
    Suppressed,
}

/// Concurrent `(device, attribute) -> PendingSuppression` table.
#[derive(Debug, Default)]
pub struct SuppressionTable {
    entries: DashMap<(DeviceId, String), PendingSuppression>,
}

impl SuppressionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a suppression. Replaces any earlier one for the same key.
    pub fn register(&self, device: &DeviceId, attribute: &str, expected: Value, ttl: Duration) {
        debug!(device = %device, attribute, %expected, ?ttl, "suppression registered");
        self.entries.insert(
            (device.clone(), attribute.to_owned()),
            PendingSuppression {
                expected,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Decide what to do with an observed `value`.
    ///
    /// - expected value before expiry: suppressed, and the entry is consumed
    /// - different value: the entry is cleared and the event applies
    /// - expired or absent: applies
    pub fn check(&self, device: &DeviceId, attribute: &str, value: &Value) -> Verdict {
        let key = (device.clone(), attribute.to_owned());
        let Some((_, pending)) = self.entries.remove(&key) else {
            return Verdict::Apply;
        };

        if pending.expires_at <= Instant::now() {
            debug!(device = %device, attribute, "suppression expired");
            return Verdict::Apply;
        }

        if pending.expected == *value {
            debug!(device = %device, attribute, %value, "echo suppressed");
            Verdict::Suppressed
        } else {
            debug!(
                device = %device,
                attribute,
                expected = %pending.expected,
                observed = %value,
                "suppression cleared by external change"
            );
            Verdict::Apply
        }
    }

    /// Drop a suppression, e.g. after the command it guarded failed.
    pub fn remove(&self, device: &DeviceId, attribute: &str) {
        self.entries.remove(&(device.clone(), attribute.to_owned()));
    }

    /// Forget expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, pending| pending.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
