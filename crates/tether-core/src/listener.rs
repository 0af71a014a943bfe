// ── Push listener ──
//
// Receive loop for one push channel. Attribute changes are applied inline
// so their arrival order is kept; events that need a remote fetch are
// handed to the session's task group so a slow endpoint never stalls the
// channel.

use tether_api::{PushChannel, PushEvent, RemoteEndpoint};
use tracing::{debug, info, warn};

use crate::reconcile;
use crate::session::Session;

/// Consecutive undecodable frames tolerated before the channel is treated
/// as broken.
const MAX_DECODE_FAILURES: u32 = 5;

/// Why the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// `PushHandle::close()` was called.
    Closed,
    /// The remote end went away.
    Eof,
    /// Too many frames failed to decode.
    Garbage,
}

pub(crate) async fn run<E: RemoteEndpoint>(session: Session<E>, channel: PushChannel, generation: u64) {
    let PushChannel { mut frames, handle } = channel;
    let mut decode_failures = 0_u32;

    let exit = loop {
        tokio::select! {
            biased;
            () = handle.closed() => break Exit::Closed,
            frame = frames.recv() => {
                let Some(text) = frame else {
                    break Exit::Eof;
                };
                match session.endpoint().decode_push(&text) {
                    Ok(event) => {
                        decode_failures = 0;
                        dispatch(&session, event).await;
                    }
                    Err(e) => {
                        decode_failures += 1;
                        warn!(
                            session = %session.session_id(),
                            error = %e,
                            failures = decode_failures,
                            "undecodable push frame"
                        );
                        if decode_failures > MAX_DECODE_FAILURES {
                            handle.close();
                            break Exit::Garbage;
                        }
                    }
                }
            }
        }
    };

    let current = session.push_closed(generation);
    match exit {
        Exit::Closed => {
            debug!(session = %session.session_id(), "push listener closed");
        }
        Exit::Eof | Exit::Garbage => {
            info!(session = %session.session_id(), reason = ?exit, "push channel lost");
            // Events may have been missed while the channel was down.
            if current && !session.is_disposed() {
                session.request_force_refresh();
            }
        }
    }
}

async fn dispatch<E: RemoteEndpoint>(session: &Session<E>, event: PushEvent) {
    match event {
        PushEvent::AttributeChanged { .. }
        | PushEvent::ConnectivityChanged { .. }
        | PushEvent::Unknown { .. } => {
            session.handle_push_event(event).await;
        }
        PushEvent::DeviceRefreshNeeded { .. }
        | PushEvent::ActivityPushed { .. }
        | PushEvent::NotificationsChanged => {
            let worker = session.clone();
            session.inner.tasks.spawn("push-fetch", async move {
                worker.handle_push_event(event).await;
            });
        }
    }
}
