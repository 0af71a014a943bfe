// ── Device registry ──
//
// Concurrent set of dependent handlers. Fan-out never holds a map lock
// while invoking callbacks; instead every entry carries a gate that
// fan-out holds shared and unregistration takes exclusively. Once
// `unregister` returns, the handler is not running and will never run
// again.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tether_api::{CommandAck, DeviceId};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::error::HandlerError;
use crate::tasks::panic_message;
use crate::update::DeviceUpdate;

/// A consumer of one device's state.
///
/// Callbacks run on session worker tasks and must return promptly.
pub trait DependentHandler: Send + Sync + 'static {
    /// The device this handler follows.
    fn device_id(&self) -> &DeviceId;

    fn on_snapshot_updated(&self, update: &DeviceUpdate) -> Result<(), HandlerError>;

    fn on_command_acknowledged(&self, ack: &CommandAck) -> Result<(), HandlerError> {
        let _ = ack;
        Ok(())
    }
}

/// Opaque registration token returned by [`DeviceRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

struct Entry {
    device: DeviceId,
    handler: Arc<dyn DependentHandler>,
    /// `false` once unregistered.
    live: RwLock<bool>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    entries: DashMap<RegistrationId, Arc<Entry>>,
    next_id: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. O(1), callable from any thread.
    pub fn register(&self, handler: Arc<dyn DependentHandler>) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let device = handler.device_id().clone();
        debug!(device = %device, registration = id.0, "handler registered");
        self.entries.insert(
            id,
            Arc::new(Entry {
                device,
                handler,
                live: RwLock::new(true),
            }),
        );
        id
    }

    /// Remove a handler, waiting for any in-progress callback on it.
    ///
    /// Must not be awaited from inside that handler's own callback.
    /// Returns `false` if the id was unknown.
    pub async fn unregister(&self, id: RegistrationId) -> bool {
        let Some((_, entry)) = self.entries.remove(&id) else {
            return false;
        };
        *entry.live.write().await = false;
        debug!(device = %entry.device, registration = id.0, "handler unregistered");
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Devices with at least one registered handler.
    pub fn watched_devices(&self) -> BTreeSet<DeviceId> {
        self.entries.iter().map(|e| e.device.clone()).collect()
    }

    pub fn is_watched(&self, device: &DeviceId) -> bool {
        self.entries.iter().any(|e| e.device == *device)
    }

    // ── Fan-out ──────────────────────────────────────────────────────

    /// Deliver `update` to every handler following `device`.
    ///
    /// A failing or panicking handler is logged and skipped. Returns how
    /// many handlers accepted the update.
    pub async fn fan_out(&self, device: &DeviceId, update: &DeviceUpdate) -> usize {
        let mut delivered = 0;
        for (id, entry) in self.entries_for(device) {
            if invoke(id, &entry, "on_snapshot_updated", |h| h.on_snapshot_updated(update)).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver `update` to one registration only.
    pub async fn deliver_to(&self, id: RegistrationId, update: &DeviceUpdate) -> bool {
        let Some(entry) = self.entries.get(&id).map(|e| Arc::clone(e.value())) else {
            return false;
        };
        invoke(id, &entry, "on_snapshot_updated", |h| h.on_snapshot_updated(update)).await
    }

    /// Deliver a command acknowledgement to the device's handlers.
    pub async fn acknowledge(&self, ack: &CommandAck) -> usize {
        let mut delivered = 0;
        for (id, entry) in self.entries_for(&ack.device) {
            if invoke(id, &entry, "on_command_acknowledged", |h| h.on_command_acknowledged(ack))
                .await
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Snapshot of matching entries, so no shard lock is held during
    /// callbacks.
    fn entries_for(&self, device: &DeviceId) -> Vec<(RegistrationId, Arc<Entry>)> {
        let mut matching: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.device == *device)
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        matching.sort_by_key(|(id, _)| *id);
        matching
    }
}

async fn invoke<F>(id: RegistrationId, entry: &Entry, callback: &'static str, f: F) -> bool
where
    F: FnOnce(&dyn DependentHandler) -> Result<(), HandlerError>,
{
    let live = entry.live.read().await;
    if !*live {
        return false;
    }
    let handler = entry.handler.as_ref();
    match catch_unwind(AssertUnwindSafe(|| f(handler))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(
                device = %entry.device,
                registration = id.0,
                callback,
                error = %e,
                "handler failed"
            );
            false
        }
        Err(panic) => {
            error!(
                device = %entry.device,
                registration = id.0,
                callback,
                panic = panic_message(&*panic),
                "handler panicked"
            );
            false
        }
    }
}
