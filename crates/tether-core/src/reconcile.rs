// ── Reconciliation ──
//
// Turns remote data into handler updates. Full refreshes replace the
// snapshot map and fan out to watched devices; push events patch or
// re-fetch one device. Events for devices nobody watches are dropped.

use std::collections::BTreeMap;

use chrono::TimeDelta;
use futures_util::future::join_all;
use serde_json::Value;
use tether_api::{
    ActivityQuery, DetailKind, DeviceId, Notification, PushEvent, RemoteEndpoint,
};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::session::Session;
use crate::suppression::Verdict;
use crate::update::DeviceUpdate;

/// Fetch the inventory and push one update per watched device.
///
/// Only the device-list fetch is fatal. Auxiliary details and
/// notifications are best effort: a failed kind is simply absent from the
/// update. Returns the number of devices in the new inventory.
pub(crate) async fn full_refresh<E: RemoteEndpoint>(session: &Session<E>) -> Result<usize, CoreError> {
    let inner = &session.inner;
    let devices = session
        .call("fetch_device_list", inner.endpoint.fetch_device_list())
        .await?;
    let map = inner.store.replace_all(devices);

    let watched = inner.registry.watched_devices();
    if watched.is_empty() {
        return Ok(map.len());
    }

    let notifications = if inner.config.fetch_notifications {
        fetch_notifications(session).await
    } else {
        None
    };

    for device in &watched {
        let Some(snapshot) = map.get(device) else {
            debug!(device = %device, "watched device missing from inventory");
            continue;
        };

        let mut update = DeviceUpdate::from_snapshot(snapshot.clone());
        if snapshot.online {
            update.details = fetch_details(session, device, &inner.config.auxiliary_details).await;
        }
        if let Some(ref all) = notifications {
            update = update.with_notifications(notifications_for(all, device));
        }
        inner.registry.fan_out(device, &update).await;
    }

    Ok(map.len())
}

/// Fetch every auxiliary kind for one device concurrently.
async fn fetch_details<E: RemoteEndpoint>(
    session: &Session<E>,
    device: &DeviceId,
    kinds: &[DetailKind],
) -> BTreeMap<DetailKind, Value> {
    let endpoint = &session.inner.endpoint;
    let fetches = kinds.iter().map(|&kind| async move {
        let result = session
            .call("fetch_device_detail", endpoint.fetch_device_detail(device, kind))
            .await;
        (kind, result)
    });

    let mut details = BTreeMap::new();
    for (kind, result) in join_all(fetches).await {
        match result {
            Ok(value) => {
                details.insert(kind, value);
            }
            Err(CoreError::Unsupported { .. }) => {
                debug!(device = %device, %kind, "detail not supported");
            }
            Err(e) => {
                warn!(device = %device, %kind, error = %e, "detail fetch failed");
            }
        }
    }
    details
}

async fn fetch_notifications<E: RemoteEndpoint>(session: &Session<E>) -> Option<Vec<Notification>> {
    match session
        .call(
            "fetch_notifications",
            session.inner.endpoint.fetch_notifications(),
        )
        .await
    {
        Ok(all) => Some(all),
        Err(e) => {
            warn!(error = %e, "notification fetch failed");
            None
        }
    }
}

fn notifications_for(all: &[Notification], device: &DeviceId) -> Vec<Notification> {
    all.iter().filter(|n| n.device == *device).cloned().collect()
}

// ── Push events ──────────────────────────────────────────────────────

/// Apply one push event.
pub(crate) async fn apply_push<E: RemoteEndpoint>(session: &Session<E>, event: PushEvent) {
    let inner = &session.inner;
    match event {
        PushEvent::AttributeChanged {
            device,
            attribute,
            value,
        } => {
            if inner.suppressions.check(&device, &attribute, &value) == Verdict::Suppressed {
                return;
            }
            let snapshot = inner
                .store
                .patch(&device, |s| s.with_attribute(&attribute, value.clone()));
            if !inner.registry.is_watched(&device) {
                return;
            }
            let mut update = DeviceUpdate::default().with_attribute(attribute, value);
            update.snapshot = snapshot;
            inner.registry.fan_out(&device, &update).await;
        }

        PushEvent::DeviceRefreshNeeded { device, kind } => {
            if !inner.registry.is_watched(&device) {
                debug!(device = %device, %kind, "refresh for unwatched device dropped");
                return;
            }
            refresh_detail(session, &device, kind).await;
        }

        PushEvent::ActivityPushed {
            device,
            key,
            timestamp,
        } => {
            if !inner.registry.is_watched(&device) {
                debug!(device = %device, "activity for unwatched device dropped");
                return;
            }
            correlate_activity(session, &device, &key, timestamp).await;
        }

        PushEvent::ConnectivityChanged { device } => {
            debug!(device = ?device, "connectivity changed, forcing refresh");
            session.request_force_refresh();
        }

        PushEvent::NotificationsChanged => {
            let watched = inner.registry.watched_devices();
            if watched.is_empty() {
                return;
            }
            let Some(all) = fetch_notifications(session).await else {
                return;
            };
            for device in &watched {
                let update = DeviceUpdate::default().with_notifications(notifications_for(&all, device));
                inner.registry.fan_out(device, &update).await;
            }
        }

        PushEvent::Unknown { command } => {
            debug!(%command, "ignoring unknown push command");
        }
    }
}

async fn refresh_detail<E: RemoteEndpoint>(session: &Session<E>, device: &DeviceId, kind: DetailKind) {
    let inner = &session.inner;
    match session
        .call("fetch_device_detail", inner.endpoint.fetch_device_detail(device, kind))
        .await
    {
        Ok(value) => {
            let mut update = DeviceUpdate::default().with_detail(kind, value);
            update.snapshot = inner.store.get(device);
            inner.registry.fan_out(device, &update).await;
        }
        Err(CoreError::Unsupported { .. }) => {
            debug!(device = %device, %kind, "detail not supported");
        }
        Err(e) => {
            warn!(device = %device, %kind, error = %e, "targeted refresh failed");
        }
    }
}

/// Look up the activity records around a pushed timestamp and deliver the
/// ones belonging to `device` that have not been delivered yet.
async fn correlate_activity<E: RemoteEndpoint>(
    session: &Session<E>,
    device: &DeviceId,
    key: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
) {
    let inner = &session.inner;
    let config = &inner.config;
    let lookback = TimeDelta::from_std(config.activity_lookback).unwrap_or(TimeDelta::zero());
    let lookahead = TimeDelta::from_std(config.activity_lookahead).unwrap_or(TimeDelta::zero());
    let query = ActivityQuery {
        start: timestamp - lookback,
        end: timestamp + lookahead,
        limit: config.activity_limit,
    };

    let activities = match session
        .call("fetch_activities", inner.endpoint.fetch_activities(query))
        .await
    {
        Ok(activities) => activities,
        Err(e) => {
            warn!(device = %device, error = %e, "activity fetch failed");
            return;
        }
    };

    let last_delivered = inner.last_activity.get(device).map(|t| *t);
    let mut matched: Vec<_> = activities
        .into_iter()
        .filter(|a| a.key == key || a.belongs_to(device))
        .filter(|a| last_delivered.is_none_or(|last| a.timestamp > last))
        .collect();

    if matched.is_empty() {
        debug!(device = %device, key, "no matching activity");
        return;
    }

    matched.sort_by_key(|a| a.timestamp);
    if let Some(newest) = matched.last() {
        inner.last_activity.insert(device.clone(), newest.timestamp);
    }

    let mut update = DeviceUpdate::default().with_activities(matched);
    update.snapshot = inner.store.get(device);
    inner.registry.fan_out(device, &update).await;
}
