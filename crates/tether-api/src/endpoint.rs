//! The remote endpoint contract consumed by `tether-core`.
//!
//! One implementation per protocol family. Every method is a single
//! request/response exchange; nothing here touches registered handlers.
//! Callers wrap each call in their own timeout.

use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::models::{
    Activity, ActivityQuery, CommandAck, CredentialsBlob, DetailKind, DeviceCommand, DeviceId,
    DeviceSnapshot, Notification,
};
use crate::push::{self, PushEvent};

/// Request/response and push-channel operations of one remote account or
/// gateway.
pub trait RemoteEndpoint: Send + Sync + 'static {
    /// Adopt a persisted credentials blob, renewing it if needed.
    ///
    /// Returns the blob to persist, which may differ from the input.
    fn restore_session(
        &self,
        blob: &CredentialsBlob,
    ) -> impl Future<Output = Result<CredentialsBlob, Error>> + Send;

    /// Check that the current session is still alive.
    ///
    /// `Some(blob)` means the credentials were renewed and must be
    /// persisted again.
    fn verify_session(
        &self,
    ) -> impl Future<Output = Result<Option<CredentialsBlob>, Error>> + Send;

    /// End the remote session. Local state is the caller's concern.
    fn logout(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Full device inventory.
    fn fetch_device_list(&self) -> impl Future<Output = Result<Vec<DeviceSnapshot>, Error>> + Send;

    /// One targeted resource for one device.
    ///
    /// Fails with [`Error::UnsupportedResource`] when the device lacks it.
    fn fetch_device_detail(
        &self,
        device: &DeviceId,
        kind: DetailKind,
    ) -> impl Future<Output = Result<Value, Error>> + Send;

    /// Account-wide alarms, reminders and timers.
    fn fetch_notifications(&self) -> impl Future<Output = Result<Vec<Notification>, Error>> + Send;

    /// Activity records inside a bounded window.
    fn fetch_activities(
        &self,
        query: ActivityQuery,
    ) -> impl Future<Output = Result<Vec<Activity>, Error>> + Send;

    fn send_command(
        &self,
        device: &DeviceId,
        command: &DeviceCommand,
    ) -> impl Future<Output = Result<CommandAck, Error>> + Send;

    /// Open the long-lived push channel.
    ///
    /// `Ok(None)` when the protocol has no push channel.
    fn open_push_channel(&self) -> impl Future<Output = Result<Option<PushChannel>, Error>> + Send;

    /// Decode one raw push frame.
    fn decode_push(&self, frame: &str) -> Result<PushEvent, Error> {
        push::decode(frame)
    }
}

// ── Push channel ─────────────────────────────────────────────────────

/// Buffered frames between the socket reader and the session listener.
pub const PUSH_CHANNEL_CAPACITY: usize = 256;

/// An open push channel: raw text frames plus a handle to close it.
///
/// The receiver yields `None` once the reader task exits, whether the
/// remote closed the stream or [`PushHandle::close`] was called.
pub struct PushChannel {
    pub frames: mpsc::Receiver<String>,
    pub handle: PushHandle,
}

impl PushChannel {
    /// A channel fed by the returned sender. For endpoints that read
    /// frames from a source other than a socket, and for tests.
    pub fn pair() -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        (
            tx,
            Self {
                frames: rx,
                handle: PushHandle::new(),
            },
        )
    }
}

/// Close handle for a [`PushChannel`]. Cheap to clone, callable from any
/// thread.
#[derive(Debug, Clone, Default)]
pub struct PushHandle {
    cancel: CancellationToken,
}

impl PushHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the reader task to exit. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}
