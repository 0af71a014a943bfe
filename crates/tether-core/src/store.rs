// ── Snapshot store ──
//
// Last-known device snapshots, keyed by device id. The whole map is
// immutable behind an `ArcSwap`: a full refresh builds a new map and
// swaps it in, a push patch copies the map and swaps. Readers always see
// one complete generation.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tether_api::{DeviceId, DeviceSnapshot};
use tokio::sync::watch;

/// One generation of the snapshot map.
pub type SnapshotMap = HashMap<DeviceId, Arc<DeviceSnapshot>>;

pub struct SnapshotStore {
    devices: ArcSwap<SnapshotMap>,
    last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (last_full_refresh, _) = watch::channel(None);
        Self {
            devices: ArcSwap::from_pointee(HashMap::new()),
            last_full_refresh,
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Replace every snapshot with one fetched inventory.
    ///
    /// Returns the new generation. Duplicate ids keep the last entry.
    pub fn replace_all(&self, snapshots: Vec<DeviceSnapshot>) -> Arc<SnapshotMap> {
        let map: SnapshotMap = snapshots
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();
        let map = Arc::new(map);
        self.devices.store(Arc::clone(&map));
        self.last_full_refresh.send_replace(Some(Utc::now()));
        map
    }

    /// Apply `patch` to one device's snapshot, copy-and-swap.
    ///
    /// Returns the patched snapshot, or `None` if the device has never
    /// been seen.
    pub fn patch<F>(&self, id: &DeviceId, patch: F) -> Option<Arc<DeviceSnapshot>>
    where
        F: Fn(&DeviceSnapshot) -> DeviceSnapshot,
    {
        let mut patched = None;
        self.devices.rcu(|current| {
            let Some(existing) = current.get(id) else {
                patched = None;
                return Arc::clone(current);
            };
            let next = Arc::new(patch(existing));
            patched = Some(Arc::clone(&next));
            let mut map = SnapshotMap::clone(current);
            map.insert(id.clone(), next);
            Arc::new(map)
        });
        patched
    }

    /// Drop every snapshot (logout).
    pub fn clear(&self) {
        self.devices.store(Arc::new(HashMap::new()));
        self.last_full_refresh.send_replace(None);
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &DeviceId) -> Option<Arc<DeviceSnapshot>> {
        self.devices.load().get(id).cloned()
    }

    /// The current generation (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<SnapshotMap> {
        self.devices.load_full()
    }

    pub fn len(&self) -> usize {
        self.devices.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.load().is_empty()
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
