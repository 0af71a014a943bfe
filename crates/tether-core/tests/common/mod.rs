#![allow(clippy::unwrap_used, dead_code)]
// Shared fixtures for tether-core integration tests: a scripted in-memory
// endpoint and a few dependent handlers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use tether_api::{
    Activity, ActivityQuery, CommandAck, CredentialsBlob, DetailKind, DeviceCommand, DeviceId,
    DeviceSnapshot, Error, Notification, PushChannel,
};
use tether_core::persistence::session_key;
use tether_core::{
    BlobStore, CoreError, DependentHandler, DeviceUpdate, HandlerError, MemoryBlobStore,
    RemoteEndpoint, Session, SessionConfig,
};

pub const SESSION_ID: &str = "acct-1";
pub const DEVICE: &str = "ABC123";

// ── Scripted failures ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    Auth,
    Network,
}

impl Fail {
    fn error(self) -> Error {
        match self {
            Self::Auth => Error::SessionExpired,
            Self::Network => Error::Api {
                status: 503,
                message: "service unavailable".into(),
            },
        }
    }
}

// ── Fake endpoint ───────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    devices: Vec<DeviceSnapshot>,
    list_failures: VecDeque<Fail>,
    list_delay: Duration,
    restore_failure: Option<Fail>,
    renewed_on_verify: Option<CredentialsBlob>,
    verify_failure: Option<Fail>,
    details: HashMap<(DeviceId, DetailKind), Value>,
    notifications: Vec<Notification>,
    activities: Vec<Activity>,
    command_failure: Option<Fail>,
    push_enabled: bool,
    push_tx: Option<mpsc::Sender<String>>,
    activity_queries: Vec<ActivityQuery>,
    commands: Vec<(DeviceId, DeviceCommand)>,
}

#[derive(Default)]
pub struct FakeEndpoint {
    script: Mutex<Script>,
    list_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    push_opens: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<DeviceSnapshot>) -> Self {
        let endpoint = Self::new();
        endpoint.script().devices = devices;
        endpoint
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn set_devices(&self, devices: Vec<DeviceSnapshot>) {
        self.script().devices = devices;
    }

    pub fn fail_next_list(&self, fail: Fail) {
        self.script().list_failures.push_back(fail);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.script().list_delay = delay;
    }

    pub fn fail_restore(&self, fail: Fail) {
        self.script().restore_failure = Some(fail);
    }

    pub fn fail_verify(&self, fail: Fail) {
        self.script().verify_failure = Some(fail);
    }

    pub fn renew_on_verify(&self, blob: CredentialsBlob) {
        self.script().renewed_on_verify = Some(blob);
    }

    pub fn set_detail(&self, device: &str, kind: DetailKind, value: Value) {
        self.script()
            .details
            .insert((DeviceId::from(device), kind), value);
    }

    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        self.script().notifications = notifications;
    }

    pub fn set_activities(&self, activities: Vec<Activity>) {
        self.script().activities = activities;
    }

    pub fn fail_commands(&self, fail: Fail) {
        self.script().command_failure = Some(fail);
    }

    pub fn enable_push(&self) {
        self.script().push_enabled = true;
    }

    /// Sender half of the most recently opened push channel.
    pub fn push_sender(&self) -> Option<mpsc::Sender<String>> {
        self.script().push_tx.clone()
    }

    /// Drop the sender so the listener sees end-of-stream.
    pub fn drop_push(&self) {
        self.script().push_tx = None;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn push_opens(&self) -> usize {
        self.push_opens.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn activity_queries(&self) -> Vec<ActivityQuery> {
        self.script().activity_queries.clone()
    }

    pub fn commands(&self) -> Vec<(DeviceId, DeviceCommand)> {
        self.script().commands.clone()
    }
}

impl RemoteEndpoint for FakeEndpoint {
    async fn restore_session(&self, blob: &CredentialsBlob) -> Result<CredentialsBlob, Error> {
        match self.script().restore_failure {
            Some(fail) => Err(fail.error()),
            None => Ok(blob.clone()),
        }
    }

    async fn verify_session(&self) -> Result<Option<CredentialsBlob>, Error> {
        let mut script = self.script();
        match script.verify_failure {
            Some(fail) => Err(fail.error()),
            None => Ok(script.renewed_on_verify.take()),
        }
    }

    async fn logout(&self) -> Result<(), Error> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_device_list(&self) -> Result<Vec<DeviceSnapshot>, Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (delay, failure, devices) = {
            let mut script = self.script();
            (
                script.list_delay,
                script.list_failures.pop_front(),
                script.devices.clone(),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match failure {
            Some(fail) => Err(fail.error()),
            None => Ok(devices),
        }
    }

    async fn fetch_device_detail(&self, device: &DeviceId, kind: DetailKind) -> Result<Value, Error> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.script()
            .details
            .get(&(device.clone(), kind))
            .cloned()
            .ok_or_else(|| Error::UnsupportedResource {
                device: device.clone(),
                kind,
            })
    }

    async fn fetch_notifications(&self) -> Result<Vec<Notification>, Error> {
        Ok(self.script().notifications.clone())
    }

    async fn fetch_activities(&self, query: ActivityQuery) -> Result<Vec<Activity>, Error> {
        let mut script = self.script();
        script.activity_queries.push(query);
        Ok(script
            .activities
            .iter()
            .filter(|a| a.timestamp >= query.start && a.timestamp <= query.end)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn send_command(
        &self,
        device: &DeviceId,
        command: &DeviceCommand,
    ) -> Result<CommandAck, Error> {
        let mut script = self.script();
        script.commands.push((device.clone(), command.clone()));
        match script.command_failure {
            Some(fail) => Err(fail.error()),
            None => Ok(CommandAck {
                device: device.clone(),
                attribute: command.attribute.clone(),
                value: command.value.clone(),
                acknowledged_at: Utc::now(),
            }),
        }
    }

    async fn open_push_channel(&self) -> Result<Option<PushChannel>, Error> {
        let mut script = self.script();
        if !script.push_enabled {
            return Ok(None);
        }
        self.push_opens.fetch_add(1, Ordering::SeqCst);
        let (tx, channel) = PushChannel::pair();
        script.push_tx = Some(tx);
        Ok(Some(channel))
    }
}

// ── Handlers ────────────────────────────────────────────────────────

/// Records every update and acknowledgement it receives.
pub struct Recording {
    device: DeviceId,
    updates: Mutex<Vec<DeviceUpdate>>,
    acks: Mutex<Vec<CommandAck>>,
}

impl Recording {
    pub fn new(device: &str) -> Arc<Self> {
        Arc::new(Self {
            device: DeviceId::from(device),
            updates: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
        })
    }

    pub fn updates(&self) -> Vec<DeviceUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn acks(&self) -> Vec<CommandAck> {
        self.acks.lock().unwrap().clone()
    }

    /// Every attribute value delivered for `attribute`, in order.
    pub fn attribute_values(&self, attribute: &str) -> Vec<Value> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| u.attributes.get(attribute).cloned())
            .collect()
    }
}

impl DependentHandler for Recording {
    fn device_id(&self) -> &DeviceId {
        &self.device
    }

    fn on_snapshot_updated(&self, update: &DeviceUpdate) -> Result<(), HandlerError> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }

    fn on_command_acknowledged(&self, ack: &CommandAck) -> Result<(), HandlerError> {
        self.acks.lock().unwrap().push(ack.clone());
        Ok(())
    }
}

pub struct Failing(pub DeviceId);

impl DependentHandler for Failing {
    fn device_id(&self) -> &DeviceId {
        &self.0
    }

    fn on_snapshot_updated(&self, _update: &DeviceUpdate) -> Result<(), HandlerError> {
        Err(HandlerError::new("rejected"))
    }
}

pub struct Panicking(pub DeviceId);

impl DependentHandler for Panicking {
    fn device_id(&self) -> &DeviceId {
        &self.0
    }

    fn on_snapshot_updated(&self, _update: &DeviceUpdate) -> Result<(), HandlerError> {
        panic!("handler bug");
    }
}

// ── Credential stores ───────────────────────────────────────────────

/// A credential store whose writes always fail. Reads fail too unless a
/// blob is given.
pub struct BrokenStore {
    readable: Option<CredentialsBlob>,
}

impl BrokenStore {
    pub fn unreadable() -> Arc<Self> {
        Arc::new(Self { readable: None })
    }

    pub fn read_only(blob: CredentialsBlob) -> Arc<Self> {
        Arc::new(Self {
            readable: Some(blob),
        })
    }

    fn broken() -> CoreError {
        CoreError::Persistence {
            message: "disk unreadable".into(),
        }
    }
}

impl BlobStore for BrokenStore {
    fn load(&self, _key: &str) -> Result<Option<CredentialsBlob>, CoreError> {
        match &self.readable {
            Some(blob) => Ok(Some(blob.clone())),
            None => Err(Self::broken()),
        }
    }

    fn save(&self, _key: &str, _blob: &CredentialsBlob) -> Result<(), CoreError> {
        Err(Self::broken())
    }

    fn delete(&self, _key: &str) -> Result<(), CoreError> {
        Err(Self::broken())
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn device(id: &str) -> DeviceSnapshot {
    DeviceSnapshot::new(id, true).with_attribute("volume", json!(20))
}

pub fn config() -> SessionConfig {
    SessionConfig::new(SESSION_ID)
}

pub fn logged_in_store() -> Arc<MemoryBlobStore> {
    Arc::new(MemoryBlobStore::with_blob(
        session_key(SESSION_ID),
        CredentialsBlob::new("blob-1"),
    ))
}

pub fn session(endpoint: FakeEndpoint, blobs: Arc<MemoryBlobStore>) -> Session<FakeEndpoint> {
    Session::new(config(), endpoint, blobs)
}

pub fn session_with_store(
    endpoint: FakeEndpoint,
    blobs: Arc<dyn BlobStore>,
) -> Session<FakeEndpoint> {
    Session::new(config(), endpoint, blobs)
}

/// A started session that has completed its first login check.
pub async fn online_session(endpoint: FakeEndpoint) -> Session<FakeEndpoint> {
    let session = session(endpoint, logged_in_store());
    session.login_check().await.unwrap();
    session
}

/// Let spawned tasks run without moving the paused clock far.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
