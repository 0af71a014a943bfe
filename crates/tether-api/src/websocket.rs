//! WebSocket push-channel reader.
//!
//! [`connect`] performs the upgrade handshake, then spawns a reader task
//! that forwards every text frame into the returned [`PushChannel`]. The
//! task exits when the server closes the stream, on a read error, or when
//! the channel's [`PushHandle`](crate::PushHandle) is closed. Either way
//! the frame receiver then yields `None`.
//!
//! There is no reconnect loop here. The session's login check reopens the
//! channel on its next tick.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use crate::endpoint::{PushChannel, PushHandle};
use crate::error::Error;

/// Keepalive ping cadence while the channel is idle.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on handing our close frame to a peer that stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open an authenticated push channel at `url`.
pub async fn connect(url: &Url, bearer: &str) -> Result<PushChannel, Error> {
    tracing::info!(url = %url, "connecting push channel");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::PushConnect(e.to_string()))?;

    let request =
        ClientRequestBuilder::new(uri).with_header("Authorization", format!("Bearer {bearer}"));

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::PushConnect(e.to_string()))?;

    tracing::info!("push channel connected");

    let (tx, channel) = PushChannel::pair();
    let handle = channel.handle.clone();
    tokio::spawn(read_loop(ws_stream, tx, handle));
    Ok(channel)
}

async fn read_loop<S>(ws_stream: WebSocketStream<S>, tx: mpsc::Sender<String>, handle: PushHandle)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.reset();

    loop {
        tokio::select! {
            biased;
            () = handle.closed() => {
                tracing::debug!("push channel closed locally");
                let close = write.send(tungstenite::Message::Close(None));
                if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
                    tracing::debug!("peer did not take the close frame, dropping socket");
                }
                break;
            }
            _ = ping.tick() => {
                if let Err(e) = write.send(tungstenite::Message::Ping(Vec::new().into())).await {
                    tracing::warn!(error = %e, "push channel ping failed");
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if tx.send(text.as_str().to_owned()).await.is_err() {
                            // Listener went away.
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "push channel close frame received"
                            );
                        } else {
                            tracing::info!("push channel close frame received (no payload)");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "push channel read error");
                        break;
                    }
                    None => {
                        tracing::info!("push channel stream ended");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame
                    }
                }
            }
        }
    }
}

/// Derive the `ws(s)://` push URL from an `http(s)://` base.
pub(crate) fn push_url(base: &Url, path: &str) -> Result<Url, Error> {
    let mut url = base.join(path)?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(Error::PushConnect(format!(
                "unsupported scheme for push channel: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::PushConnect(format!("cannot switch {base} to {scheme}")))?;
    Ok(url)
}
