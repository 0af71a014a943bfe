// ── Update batch ──
//
// One immutable bundle per delivery to a handler. Every field is
// optional; absent means "not part of this update", never "cleared".

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tether_api::{Activity, DetailKind, DeviceId, DeviceSnapshot, Notification};

/// What changed for one device in one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    /// Full snapshot, present after a full refresh or a patch.
    pub snapshot: Option<Arc<DeviceSnapshot>>,
    /// Auxiliary resources fetched alongside. Missing kinds failed or were
    /// not requested.
    pub details: BTreeMap<DetailKind, Value>,
    /// Individual attributes changed by a push event.
    pub attributes: BTreeMap<String, Value>,
    /// This device's slice of the account notification list.
    pub notifications: Option<Vec<Notification>>,
    /// Newly correlated activity records, oldest first.
    pub activities: Vec<Activity>,
}

impl DeviceUpdate {
    pub fn from_snapshot(snapshot: Arc<DeviceSnapshot>) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, kind: DetailKind, value: Value) -> Self {
        self.details.insert(kind, value);
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(attribute.into(), value);
        self
    }

    pub fn with_notifications(mut self, notifications: Vec<Notification>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn with_activities(mut self, activities: Vec<Activity>) -> Self {
        self.activities = activities;
        self
    }

    pub fn device(&self) -> Option<&DeviceId> {
        self.snapshot.as_ref().map(|s| &s.id)
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none()
            && self.details.is_empty()
            && self.attributes.is_empty()
            && self.notifications.is_none()
            && self.activities.is_empty()
    }
}
