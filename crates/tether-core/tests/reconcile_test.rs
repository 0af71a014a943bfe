#![allow(clippy::unwrap_used)]
// Reconciliation tests: fan-out of full refreshes, push events, echo
// suppression, activity correlation and push-channel loss.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{
    DEVICE, Fail, FakeEndpoint, Failing, Panicking, Recording, device, eventually,
    online_session, settle,
};
use tether_api::{Activity, NotificationKind};
use tether_core::{
    DetailKind, DeviceCommand, DeviceId, Notification, PushEvent, PushState, RefreshOutcome,
};

fn volume_changed(device: &str, volume: i64) -> PushEvent {
    PushEvent::AttributeChanged {
        device: DeviceId::from(device),
        attribute: "volume".into(),
        value: json!(volume),
    }
}

fn volume_frame(device: &str, volume: i64) -> String {
    json!({
        "command": "PUSH_VOLUME_CHANGE",
        "payload": json!({
            "dopplerId": { "deviceSerialNumber": device },
            "volumeSetting": volume,
            "isMuted": false
        })
        .to_string(),
        "timeStamp": 1_700_000_000_000_i64,
    })
    .to_string()
}

// ── Full refresh ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unsupported_details_do_not_fail_refresh() {
    let endpoint = FakeEndpoint::with_devices(vec![device(DEVICE)]);
    endpoint.set_detail(DEVICE, DetailKind::Volume, json!({ "volume": 20 }));
    let session = online_session(endpoint).await;
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;

    let outcome = session.data_refresh().await.unwrap();

    assert_eq!(outcome, RefreshOutcome::Completed { devices: 1 });
    assert!(session.current_status().is_online());
    let update = handler.updates().pop().unwrap();
    assert_eq!(update.details.len(), 1);
    assert_eq!(update.details.get(&DetailKind::Volume), Some(&json!({ "volume": 20 })));
    assert!(update.snapshot.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_offline_devices_skip_detail_fetches() {
    let endpoint = FakeEndpoint::with_devices(vec![tether_api::DeviceSnapshot::new(DEVICE, false)]);
    let session = online_session(endpoint).await;
    session.register(Recording::new(DEVICE)).await;

    session.data_refresh().await.unwrap();
    assert_eq!(session.endpoint().detail_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_handlers_are_isolated() {
    let session = online_session(FakeEndpoint::with_devices(vec![device(DEVICE)])).await;
    session
        .register(Arc::new(Panicking(DeviceId::from(DEVICE))))
        .await;
    session
        .register(Arc::new(Failing(DeviceId::from(DEVICE))))
        .await;
    let healthy = Recording::new(DEVICE);
    session.register(healthy.clone()).await;

    let outcome = session.data_refresh().await.unwrap();

    assert_eq!(outcome, RefreshOutcome::Completed { devices: 1 });
    assert_eq!(healthy.count(), 1);
    assert!(session.current_status().is_online());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_only_reaches_watched_devices() {
    let endpoint = FakeEndpoint::with_devices(vec![device(DEVICE), device("XYZ789")]);
    let now = Utc::now();
    endpoint.set_notifications(vec![
        Notification {
            device: DeviceId::from(DEVICE),
            kind: NotificationKind::Alarm,
            next_at: now,
        },
        Notification {
            device: DeviceId::from("XYZ789"),
            kind: NotificationKind::Timer,
            next_at: now,
        },
    ]);
    let session = online_session(endpoint).await;
    let watched = Recording::new(DEVICE);
    let ghost = Recording::new("NOT-IN-INVENTORY");
    session.register(watched.clone()).await;
    session.register(ghost.clone()).await;

    session.data_refresh().await.unwrap();

    assert_eq!(session.snapshots().len(), 2);
    assert_eq!(ghost.count(), 0);
    let update = watched.updates().pop().unwrap();
    let notifications = update.notifications.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Alarm);
}

// ── Echo suppression ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_echo_of_own_command_is_suppressed() {
    let session = online_session(FakeEndpoint::with_devices(vec![device(DEVICE)])).await;
    session.data_refresh().await.unwrap();
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;
    let id = DeviceId::from(DEVICE);

    session
        .send_command_suppressed(&id, &DeviceCommand::new("volume", 42), None)
        .await
        .unwrap();
    assert_eq!(handler.acks().len(), 1);

    tokio::time::advance(Duration::from_millis(200)).await;
    session.handle_push_event(volume_changed(DEVICE, 42)).await;
    assert!(handler.attribute_values("volume").is_empty());

    // a genuine external change still goes through
    session.handle_push_event(volume_changed(DEVICE, 10)).await;
    assert_eq!(handler.attribute_values("volume"), vec![json!(10)]);
    assert_eq!(
        session.snapshot(&id).unwrap().attribute("volume"),
        Some(&json!(10))
    );
}

#[tokio::test(start_paused = true)]
async fn test_expired_suppression_lets_echo_through() {
    let session = online_session(FakeEndpoint::with_devices(vec![device(DEVICE)])).await;
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;
    let id = DeviceId::from(DEVICE);

    session
        .send_command_suppressed(&id, &DeviceCommand::new("volume", 42), None)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(6)).await;

    session.handle_push_event(volume_changed(DEVICE, 42)).await;
    assert_eq!(handler.attribute_values("volume"), vec![json!(42)]);
}

#[tokio::test(start_paused = true)]
async fn test_login_check_purges_expired_suppressions() {
    let session = online_session(FakeEndpoint::with_devices(vec![device(DEVICE)])).await;
    let id = DeviceId::from(DEVICE);

    session
        .send_command_suppressed(&id, &DeviceCommand::new("volume", 42), None)
        .await
        .unwrap();
    session.login_check().await.unwrap();
    assert_eq!(session.suppressions().len(), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    session.login_check().await.unwrap();
    assert!(session.suppressions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_command_clears_its_suppression() {
    let endpoint = FakeEndpoint::with_devices(vec![device(DEVICE)]);
    endpoint.fail_commands(Fail::Network);
    let session = online_session(endpoint).await;
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;
    let id = DeviceId::from(DEVICE);

    let result = session
        .send_command_suppressed(&id, &DeviceCommand::new("volume", 42), None)
        .await;

    assert!(result.is_err());
    assert!(session.suppressions().is_empty());
    assert!(handler.acks().is_empty());
    session.handle_push_event(volume_changed(DEVICE, 42)).await;
    assert_eq!(handler.attribute_values("volume"), vec![json!(42)]);
}

#[tokio::test(start_paused = true)]
async fn test_plain_command_is_not_suppressed() {
    let session = online_session(FakeEndpoint::with_devices(vec![device(DEVICE)])).await;
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;
    let id = DeviceId::from(DEVICE);

    session
        .send_command(&id, &DeviceCommand::new("volume", 42))
        .await
        .unwrap();
    session.handle_push_event(volume_changed(DEVICE, 42)).await;

    assert_eq!(handler.attribute_values("volume"), vec![json!(42)]);
    assert_eq!(session.endpoint().commands().len(), 1);
}

// ── Push events ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unwatched_attribute_change_only_patches_store() {
    let session = online_session(FakeEndpoint::with_devices(vec![device("XYZ789")])).await;
    session.data_refresh().await.unwrap();
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;

    session.handle_push_event(volume_changed("XYZ789", 5)).await;

    assert_eq!(handler.count(), 0);
    assert_eq!(
        session
            .snapshot(&DeviceId::from("XYZ789"))
            .unwrap()
            .attribute("volume"),
        Some(&json!(5))
    );
}

#[tokio::test(start_paused = true)]
async fn test_targeted_refresh_delivers_detail() {
    let endpoint = FakeEndpoint::with_devices(vec![device(DEVICE)]);
    endpoint.set_detail(DEVICE, DetailKind::Player, json!({ "state": "PLAYING" }));
    let session = online_session(endpoint).await;
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;

    session
        .handle_push_event(PushEvent::DeviceRefreshNeeded {
            device: DeviceId::from(DEVICE),
            kind: DetailKind::Player,
        })
        .await;

    let update = handler.updates().pop().unwrap();
    assert_eq!(
        update.details.get(&DetailKind::Player),
        Some(&json!({ "state": "PLAYING" }))
    );
    assert_eq!(session.endpoint().list_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_notification_change_fans_out_per_device() {
    let endpoint = FakeEndpoint::new();
    endpoint.set_notifications(vec![Notification {
        device: DeviceId::from(DEVICE),
        kind: NotificationKind::Reminder,
        next_at: Utc::now(),
    }]);
    let session = online_session(endpoint).await;
    let handler = Recording::new(DEVICE);
    let other = Recording::new("XYZ789");
    session.register(handler.clone()).await;
    session.register(other.clone()).await;

    session.handle_push_event(PushEvent::NotificationsChanged).await;

    assert_eq!(handler.updates()[0].notifications.as_ref().unwrap().len(), 1);
    assert_eq!(other.updates()[0].notifications.as_ref().unwrap().len(), 0);
}

// ── Activity correlation ────────────────────────────────────────────

fn activity(key: &str, at: chrono::DateTime<Utc>, transcript: &str) -> Activity {
    Activity {
        key: key.into(),
        timestamp: at,
        transcript: Some(transcript.into()),
        response: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_activity_is_correlated_once() {
    let pushed_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let endpoint = FakeEndpoint::new();
    endpoint.set_activities(vec![
        activity(
            &format!("1#{DEVICE}"),
            pushed_at - TimeDelta::seconds(2),
            "what time is it",
        ),
        activity("2#XYZ789", pushed_at - TimeDelta::seconds(1), "stop"),
    ]);
    let session = online_session(endpoint).await;
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;

    let event = PushEvent::ActivityPushed {
        device: DeviceId::from(DEVICE),
        key: format!("1#{DEVICE}"),
        timestamp: pushed_at,
    };
    session.handle_push_event(event.clone()).await;
    session.handle_push_event(event).await;

    let query = session.endpoint().activity_queries()[0];
    assert_eq!(query.start, pushed_at - TimeDelta::seconds(120));
    assert_eq!(query.end, pushed_at + TimeDelta::seconds(30));
    assert_eq!(query.limit, 10);

    let delivered: Vec<_> = handler
        .updates()
        .into_iter()
        .flat_map(|u| u.activities)
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].transcript.as_deref(), Some("what time is it"));
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_activity_is_dropped() {
    let pushed_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let endpoint = FakeEndpoint::new();
    endpoint.set_activities(vec![activity("2#XYZ789", pushed_at, "stop")]);
    let session = online_session(endpoint).await;
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;

    session
        .handle_push_event(PushEvent::ActivityPushed {
            device: DeviceId::from(DEVICE),
            key: format!("9#{DEVICE}"),
            timestamp: pushed_at,
        })
        .await;

    assert_eq!(handler.count(), 0);
}

// ── Push listener ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_push_frames_reach_handlers_in_order() {
    let endpoint = FakeEndpoint::with_devices(vec![device(DEVICE)]);
    endpoint.enable_push();
    let session = online_session(endpoint).await;
    assert_eq!(session.current_push_state(), PushState::Open);
    let handler = Recording::new(DEVICE);
    session.register(handler.clone()).await;

    let tx = session.endpoint().push_sender().unwrap();
    for volume in [11, 12, 13] {
        tx.send(volume_frame(DEVICE, volume)).await.unwrap();
    }

    assert!(eventually(Duration::from_millis(500), || handler.attribute_values("volume").len() == 3).await);
    assert_eq!(
        handler.attribute_values("volume"),
        vec![json!(11), json!(12), json!(13)]
    );
    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_lost_push_channel_forces_refresh() {
    let endpoint = FakeEndpoint::with_devices(vec![device(DEVICE)]);
    endpoint.enable_push();
    let session = online_session(endpoint).await;
    // let the refresh requested by the login transition run first
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let calls = session.endpoint().list_calls();

    session.endpoint().drop_push();

    assert!(eventually(Duration::from_millis(500), || {
        session.current_push_state() == PushState::Closed
    })
    .await);
    assert!(eventually(Duration::from_secs(2), || session.endpoint().list_calls() > calls).await);

    // the next login check reopens it
    session.login_check().await.unwrap();
    assert_eq!(session.current_push_state(), PushState::Open);
    assert_eq!(session.endpoint().push_opens(), 2);
    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frames_close_the_channel() {
    let endpoint = FakeEndpoint::with_devices(vec![device(DEVICE)]);
    endpoint.enable_push();
    let session = online_session(endpoint).await;
    let tx = session.endpoint().push_sender().unwrap();

    for _ in 0..6 {
        tx.send("not json".into()).await.unwrap();
    }

    assert!(eventually(Duration::from_millis(500), || {
        session.current_push_state() == PushState::Closed
    })
    .await);
    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_explicit_stop_closes_push_without_refresh() {
    let endpoint = FakeEndpoint::with_devices(vec![device(DEVICE)]);
    endpoint.enable_push();
    let session = online_session(endpoint).await;
    settle().await;

    session.stop();
    settle().await;

    assert_eq!(session.current_push_state(), PushState::Closed);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.endpoint().list_calls(), 0);
}
