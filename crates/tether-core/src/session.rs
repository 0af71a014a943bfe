// ── Session ──
//
// One authenticated connection to a remote account or gateway: the
// credentials, the connection state machine, the snapshot cache, the
// handler registry and every background task that keeps them current.
//
// Mutable session fields sit behind one `std::sync::Mutex` that is never
// held across an await. Full refreshes are serialized by `refresh_lock`;
// a refresh requested while one is running is dropped, not queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tether_api::{
    CommandAck, CredentialsBlob, DeviceCommand, DeviceId, DeviceSnapshot, PushEvent, PushHandle,
    RemoteEndpoint,
};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{CoreError, ErrorClass};
use crate::persistence::{BlobStore, session_key};
use crate::registry::{DependentHandler, DeviceRegistry, RegistrationId};
use crate::status::{ConnectionState, PushState, Status, StatusDetail};
use crate::store::{SnapshotMap, SnapshotStore};
use crate::suppression::SuppressionTable;
use crate::tasks::{Debouncer, TaskGroup};
use crate::update::DeviceUpdate;
use crate::{listener, reconcile};

// ── Refresh outcome ──────────────────────────────────────────────────

/// Result of one data-refresh attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed { devices: usize },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SkipReason {
    /// Another refresh holds the lock.
    Busy,
    NotAuthenticated,
    /// The session has been stopped.
    Disposed,
}

// ── Session ──────────────────────────────────────────────────────────

/// Mutable session fields. Only touched through [`Session::state`].
#[derive(Debug, Default)]
struct SessionState {
    credentials: Option<CredentialsBlob>,
    consecutive_failures: u32,
}

/// A device session. Cheaply cloneable; all clones share one state.
pub struct Session<E: RemoteEndpoint> {
    pub(crate) inner: Arc<SessionInner<E>>,
}

impl<E: RemoteEndpoint> Clone for Session<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct SessionInner<E: RemoteEndpoint> {
    pub(crate) config: SessionConfig,
    pub(crate) endpoint: E,
    blobs: Arc<dyn BlobStore>,
    state: Mutex<SessionState>,
    refresh_lock: tokio::sync::Mutex<()>,
    login_lock: tokio::sync::Mutex<()>,
    pub(crate) store: SnapshotStore,
    pub(crate) registry: DeviceRegistry,
    pub(crate) suppressions: SuppressionTable,
    status: watch::Sender<Status>,
    connection: watch::Sender<ConnectionState>,
    push_state: watch::Sender<PushState>,
    push: Mutex<Option<(u64, PushHandle)>>,
    push_generation: AtomicU64,
    pub(crate) tasks: TaskGroup,
    force_refresh: Debouncer,
    started: AtomicBool,
    disposed: AtomicBool,
    /// Timestamp of the newest activity delivered per device.
    pub(crate) last_activity: DashMap<DeviceId, DateTime<Utc>>,
}

impl<E: RemoteEndpoint> Session<E> {
    /// Create a session. Does not start anything: call
    /// [`start()`](Self::start).
    pub fn new(config: SessionConfig, endpoint: E, blobs: Arc<dyn BlobStore>) -> Self {
        let (status, _) = watch::channel(Status::unknown());
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (push_state, _) = watch::channel(PushState::Closed);
        let force_refresh = Debouncer::new(config.force_refresh_debounce);

        Self {
            inner: Arc::new(SessionInner {
                config,
                endpoint,
                blobs,
                state: Mutex::new(SessionState::default()),
                refresh_lock: tokio::sync::Mutex::new(()),
                login_lock: tokio::sync::Mutex::new(()),
                store: SnapshotStore::new(),
                registry: DeviceRegistry::new(),
                suppressions: SuppressionTable::new(),
                status,
                connection,
                push_state,
                push: Mutex::new(None),
                push_generation: AtomicU64::new(0),
                tasks: TaskGroup::new(),
                force_refresh,
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                last_activity: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn session_id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub fn endpoint(&self) -> &E {
        &self.inner.endpoint
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the login-check and data-refresh loops.
    ///
    /// Login check runs immediately and then every
    /// `login_check_interval`; data refresh starts `refresh_stagger` later
    /// and repeats every `data_refresh_interval`. Idempotent.
    pub fn start(&self) {
        if self.is_disposed() || self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let config = &self.inner.config;
        info!(session = %config.session_id, "starting session");

        let session = self.clone();
        self.inner.tasks.spawn_periodic(
            "login-check",
            Duration::ZERO,
            config.login_check_interval,
            move || {
                let session = session.clone();
                async move {
                    if let Err(e) = session.login_check().await {
                        debug!(session = %session.session_id(), error = %e, "login check failed");
                    }
                }
            },
        );

        let session = self.clone();
        self.inner.tasks.spawn_periodic(
            "data-refresh",
            config.refresh_stagger,
            config.data_refresh_interval,
            move || {
                let session = session.clone();
                async move {
                    session.refresh_and_log().await;
                }
            },
        );
    }

    /// Cancel every task and close the push channel.
    ///
    /// Idempotent and safe before `start()`. Does not wait. A periodic or
    /// forced refresh that already started runs to completion but is not
    /// re-armed. Timers that have not fired yet are dropped. Use
    /// [`join()`](Self::join) to wait.
    pub fn stop(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session = %self.session_id(), "stopping session");
        self.inner.tasks.stop_all();
        self.close_push();
    }

    /// Wait for background tasks to wind down after [`stop()`](Self::stop).
    pub async fn join(&self) {
        self.inner.tasks.join().await;
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Background tasks still running (loops, listener, pending refresh).
    pub fn active_tasks(&self) -> usize {
        self.inner.tasks.active()
    }

    // ── Login check ──────────────────────────────────────────────────

    /// Restore or verify the session.
    ///
    /// Unauthenticated: restore from held or persisted credentials, or
    /// report `ConfigurationPending` with the login URL. Authenticated:
    /// verify and renew, and reopen the push channel if it dropped.
    pub async fn login_check(&self) -> Result<(), CoreError> {
        if self.is_disposed() {
            return Err(CoreError::SessionStopped);
        }
        let _login = self.inner.login_lock.lock().await;

        let purged = self.inner.suppressions.purge_expired();
        if purged > 0 {
            debug!(session = %self.session_id(), purged, "expired suppressions dropped");
        }

        if self.current_connection_state().is_authenticated() {
            self.verify().await
        } else {
            self.restore().await
        }
    }

    async fn restore(&self) -> Result<(), CoreError> {
        let key = session_key(self.session_id());
        let held = self.state().credentials.clone();
        let blob = match held {
            Some(blob) => blob,
            None => match self
                .inner
                .blobs
                .load(&key)
                .map_err(|e| self.persistence_failed(e))?
            {
                Some(blob) => blob,
                None => {
                    self.set_connection(ConnectionState::Disconnected);
                    let login_url = self.inner.config.login_url();
                    self.set_status(Status::offline(
                        StatusDetail::ConfigurationPending,
                        format!("Login required. Open {login_url} to sign in"),
                    ));
                    return Err(CoreError::NotAuthenticated);
                }
            },
        };

        self.set_connection(ConnectionState::Connecting);
        let restored = self
            .call(
                "restore_session",
                self.inner.endpoint.restore_session(&blob),
            )
            .await;

        match restored {
            Ok(renewed) => {
                if renewed != blob {
                    self.inner
                        .blobs
                        .save(&key, &renewed)
                        .map_err(|e| self.persistence_failed(e))?;
                }
                self.state().credentials = Some(renewed);
                self.set_connection(ConnectionState::Authenticated);
                self.set_status(Status::online());
                info!(session = %self.session_id(), "session authenticated");
                self.ensure_push().await;
                self.request_force_refresh();
                Ok(())
            }
            Err(e) => {
                self.record_failure();
                if e.class() == ErrorClass::Auth {
                    warn!(session = %self.session_id(), error = %e, "stored credentials rejected");
                    self.state().credentials = None;
                    if let Err(pe) = self.inner.blobs.delete(&key) {
                        warn!(session = %self.session_id(), error = %pe, "could not delete rejected credentials");
                    }
                } else {
                    warn!(session = %self.session_id(), error = %e, "session restore failed");
                }
                self.set_connection(ConnectionState::Disconnected);
                self.report_error(&e);
                Err(e)
            }
        }
    }

    async fn verify(&self) -> Result<(), CoreError> {
        let verified = self
            .call("verify_session", self.inner.endpoint.verify_session())
            .await;
        match verified {
            Ok(renewed) => {
                if let Some(blob) = renewed {
                    debug!(session = %self.session_id(), "credentials renewed");
                    self.state().credentials = Some(blob.clone());
                    if let Err(e) = self.inner.blobs.save(&session_key(self.session_id()), &blob) {
                        self.close_push();
                        return Err(self.persistence_failed(e));
                    }
                }
                self.ensure_push().await;
                Ok(())
            }
            Err(e) => {
                self.handle_session_error(&e);
                Err(e)
            }
        }
    }

    // ── Data refresh ─────────────────────────────────────────────────

    /// Run one full refresh unless another is in flight.
    pub async fn data_refresh(&self) -> Result<RefreshOutcome, CoreError> {
        if self.is_disposed() {
            return Ok(RefreshOutcome::Skipped(SkipReason::Disposed));
        }
        if !self.current_connection_state().is_authenticated() {
            return Ok(RefreshOutcome::Skipped(SkipReason::NotAuthenticated));
        }
        let Ok(_guard) = self.inner.refresh_lock.try_lock() else {
            debug!(session = %self.session_id(), "refresh already running, dropping request");
            return Ok(RefreshOutcome::Skipped(SkipReason::Busy));
        };
        if self.is_disposed() {
            return Ok(RefreshOutcome::Skipped(SkipReason::Disposed));
        }

        match reconcile::full_refresh(self).await {
            Ok(devices) => {
                self.state().consecutive_failures = 0;
                self.set_connection(ConnectionState::Authenticated);
                self.set_status(Status::online());
                debug!(session = %self.session_id(), devices, "data refresh complete");
                Ok(RefreshOutcome::Completed { devices })
            }
            Err(e) => {
                self.handle_session_error(&e);
                Err(e)
            }
        }
    }

    async fn refresh_and_log(&self) {
        Self::log_refresh(self.session_id(), self.data_refresh().await);
    }

    fn log_refresh(session: &str, outcome: Result<RefreshOutcome, CoreError>) {
        match outcome {
            Ok(RefreshOutcome::Skipped(reason)) => {
                debug!(session, %reason, "data refresh skipped");
            }
            Ok(RefreshOutcome::Completed { .. }) => {}
            Err(e) => {
                warn!(session, error = %e, "data refresh failed");
            }
        }
    }

    /// Ask for a full refresh soon. Requests inside the debounce window
    /// coalesce. Returns `true` if this call armed the timer.
    ///
    /// A forced refresh that finds another refresh running is re-armed
    /// once, since the running one may have started before the request.
    pub fn request_force_refresh(&self) -> bool {
        self.arm_force_refresh(true)
    }

    fn arm_force_refresh(&self, retry_if_busy: bool) -> bool {
        let session = self.clone();
        self.inner.force_refresh.request(&self.inner.tasks, move || async move {
            session.forced_refresh(retry_if_busy).await;
        })
    }

    async fn forced_refresh(&self, retry_if_busy: bool) {
        match self.data_refresh().await {
            Ok(RefreshOutcome::Skipped(SkipReason::Busy)) if retry_if_busy => {
                debug!(session = %self.session_id(), "refresh busy, re-arming forced refresh");
                self.arm_force_refresh(false);
            }
            outcome => Self::log_refresh(self.session_id(), outcome),
        }
    }

    // ── External login flow ──────────────────────────────────────────

    /// Adopt credentials produced by an external login flow.
    ///
    /// Persists the blob, drops the push channel and current session, and
    /// runs a login check right away.
    pub async fn set_credentials(&self, blob: CredentialsBlob) -> Result<(), CoreError> {
        if self.is_disposed() {
            return Err(CoreError::SessionStopped);
        }
        self.inner
            .blobs
            .save(&session_key(self.session_id()), &blob)
            .map_err(|e| self.persistence_failed(e))?;
        self.close_push();
        self.state().credentials = Some(blob);
        self.set_connection(ConnectionState::Disconnected);
        info!(session = %self.session_id(), "credentials updated");
        self.login_check().await
    }

    /// End the remote session and forget everything local.
    pub async fn logout(&self) -> Result<(), CoreError> {
        let _login = self.inner.login_lock.lock().await;
        self.close_push();

        if self.current_connection_state().is_authenticated() {
            if let Err(e) = self.call("logout", self.inner.endpoint.logout()).await {
                warn!(session = %self.session_id(), error = %e, "remote logout failed (non-fatal)");
            }
        }

        let deleted = self.inner.blobs.delete(&session_key(self.session_id()));
        self.state().credentials = None;
        self.inner.store.clear();
        self.inner.suppressions.clear();
        self.inner.last_activity.clear();
        if let Err(e) = deleted {
            return Err(self.persistence_failed(e));
        }
        self.set_connection(ConnectionState::Disconnected);
        let login_url = self.inner.config.login_url();
        self.set_status(Status::offline(
            StatusDetail::ConfigurationPending,
            format!("Logged out. Open {login_url} to sign in again"),
        ));
        info!(session = %self.session_id(), "logged out");
        Ok(())
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// Register a handler.
    ///
    /// A device already in the snapshot cache is delivered to the new
    /// handler at once. Otherwise a force refresh is requested so the
    /// handler does not wait a full poll interval.
    pub async fn register(&self, handler: Arc<dyn DependentHandler>) -> RegistrationId {
        let device = handler.device_id().clone();
        let id = self.inner.registry.register(handler);

        match self.inner.store.get(&device) {
            Some(snapshot) => {
                let update = DeviceUpdate::from_snapshot(snapshot);
                self.inner.registry.deliver_to(id, &update).await;
            }
            None => {
                debug!(session = %self.session_id(), device = %device, "unknown device, forcing refresh");
                self.request_force_refresh();
            }
        }
        id
    }

    /// Remove a handler. Once this returns the handler is never invoked
    /// again.
    pub async fn unregister(&self, id: RegistrationId) -> bool {
        self.inner.registry.unregister(id).await
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send a command without echo suppression.
    pub async fn send_command(
        &self,
        device: &DeviceId,
        command: &DeviceCommand,
    ) -> Result<CommandAck, CoreError> {
        if self.is_disposed() {
            return Err(CoreError::SessionStopped);
        }
        if !self.current_connection_state().is_authenticated() {
            return Err(CoreError::NotAuthenticated);
        }

        let ack = self
            .call(
                "send_command",
                self.inner.endpoint.send_command(device, command),
            )
            .await?;

        let attribute = ack.attribute.clone();
        let value = ack.value.clone();
        self.inner
            .store
            .patch(device, move |s| s.with_attribute(&attribute, value.clone()));
        self.inner.registry.acknowledge(&ack).await;
        Ok(ack)
    }

    /// Send a command and ignore its echo for `ttl` (default
    /// `suppression_ttl`).
    ///
    /// The suppression is registered before the command goes out. If the
    /// send fails it is removed again and the error returned.
    pub async fn send_command_suppressed(
        &self,
        device: &DeviceId,
        command: &DeviceCommand,
        ttl: Option<Duration>,
    ) -> Result<CommandAck, CoreError> {
        let ttl = ttl.unwrap_or(self.inner.config.suppression_ttl);
        self.inner
            .suppressions
            .register(device, &command.attribute, command.value.clone(), ttl);

        match self.send_command(device, command).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                self.inner.suppressions.remove(device, &command.attribute);
                Err(e)
            }
        }
    }

    /// Feed one decoded push event through reconciliation, as the push
    /// listener does.
    pub async fn handle_push_event(&self, event: PushEvent) {
        reconcile::apply_push(self, event).await;
    }

    // ── Observability ────────────────────────────────────────────────

    pub fn status(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    pub fn current_status(&self) -> Status {
        self.inner.status.borrow().clone()
    }

    /// Status changes as a stream, starting with the current value.
    pub fn status_stream(&self) -> WatchStream<Status> {
        WatchStream::new(self.inner.status.subscribe())
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    pub fn current_connection_state(&self) -> ConnectionState {
        *self.inner.connection.borrow()
    }

    pub fn push_state(&self) -> watch::Receiver<PushState> {
        self.inner.push_state.subscribe()
    }

    pub fn current_push_state(&self) -> PushState {
        *self.inner.push_state.borrow()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner.store.last_full_refresh()
    }

    pub fn snapshot(&self, device: &DeviceId) -> Option<Arc<DeviceSnapshot>> {
        self.inner.store.get(device)
    }

    pub fn snapshots(&self) -> Arc<SnapshotMap> {
        self.inner.store.snapshot()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn suppressions(&self) -> &SuppressionTable {
        &self.inner.suppressions
    }

    // ── Push channel ─────────────────────────────────────────────────

    async fn ensure_push(&self) {
        if !self.inner.config.push_enabled
            || self.is_disposed()
            || self.current_push_state() != PushState::Closed
        {
            return;
        }
        self.inner.push_state.send_replace(PushState::Connecting);

        let opened = self
            .call("open_push_channel", self.inner.endpoint.open_push_channel())
            .await;
        match opened {
            Ok(Some(channel)) => {
                let generation = self.inner.push_generation.fetch_add(1, Ordering::AcqRel) + 1;
                *self.push_slot() = Some((generation, channel.handle.clone()));
                self.inner.push_state.send_replace(PushState::Open);
                info!(session = %self.session_id(), "push channel open");
                let session = self.clone();
                let spawned = self.inner.tasks.spawn("push-listener", async move {
                    listener::run(session, channel, generation).await;
                });
                if !spawned {
                    self.close_push();
                }
            }
            Ok(None) => {
                debug!(session = %self.session_id(), "endpoint has no push channel");
                self.inner.push_state.send_replace(PushState::Closed);
            }
            Err(e) => {
                warn!(session = %self.session_id(), error = %e, "push channel failed to open");
                self.inner.push_state.send_replace(PushState::Closed);
            }
        }
    }

    /// Explicitly close the push channel, if any.
    fn close_push(&self) {
        if let Some((_, handle)) = self.push_slot().take() {
            handle.close();
            debug!(session = %self.session_id(), "push channel close requested");
        }
        self.inner.push_state.send_replace(PushState::Closed);
    }

    /// Called by the listener when its loop ends. Stale generations are
    /// ignored. Returns `true` if this was the current channel.
    pub(crate) fn push_closed(&self, generation: u64) -> bool {
        let mut slot = self.push_slot();
        match slot.as_ref() {
            Some((current, _)) if *current == generation => {
                *slot = None;
                drop(slot);
                self.inner.push_state.send_replace(PushState::Closed);
                true
            }
            _ => false,
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_slot(&self) -> MutexGuard<'_, Option<(u64, PushHandle)>> {
        self.inner.push.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one remote call under `request_timeout`.
    pub(crate) async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, tether_api::Error>>,
    {
        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result.map_err(CoreError::from),
            Err(_) => {
                debug!(session = %self.session_id(), operation, ?timeout, "remote call timed out");
                Err(CoreError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Report a credential-store failure and drop to `Disconnected`.
    fn persistence_failed(&self, e: CoreError) -> CoreError {
        self.record_failure();
        warn!(session = %self.session_id(), error = %e, "credential store failed");
        self.set_connection(ConnectionState::Disconnected);
        self.report_error(&e);
        e
    }

    fn record_failure(&self) {
        let mut state = self.state();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
    }

    /// Session-level failure from verify or refresh.
    fn handle_session_error(&self, e: &CoreError) {
        self.record_failure();
        if e.class() == ErrorClass::Auth {
            warn!(session = %self.session_id(), error = %e, "session no longer authenticated");
            self.close_push();
            self.set_connection(ConnectionState::Disconnected);
        } else {
            self.set_connection(ConnectionState::Degraded);
        }
        self.report_error(e);
    }

    fn report_error(&self, e: &CoreError) {
        let login_url = self.inner.config.login_url();
        self.set_status(Status::offline(e.status_detail(), e.status_message(&login_url)));
    }

    fn set_connection(&self, next: ConnectionState) {
        let previous = self.inner.connection.send_replace(next);
        if previous != next {
            debug!(session = %self.session_id(), from = %previous, to = %next, "connection state");
        }
    }

    fn set_status(&self, next: Status) {
        let changed = self.inner.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            info!(session = %self.session_id(), status = %next, "status changed");
        }
    }
}
