// tether-api: Remote endpoint contract and the HTTP + WebSocket client
// that implements it.

pub mod endpoint;
pub mod error;
pub mod http;
pub mod models;
pub mod push;
pub mod transport;
pub mod websocket;

pub use endpoint::{PushChannel, PushHandle, RemoteEndpoint};
pub use error::{Error, ErrorKind};
pub use http::HttpEndpoint;
pub use models::{
    Activity, ActivityQuery, CommandAck, CredentialsBlob, DetailKind, DeviceCommand, DeviceId,
    DeviceSnapshot, Notification, NotificationKind,
};
pub use push::PushEvent;
pub use transport::{TlsMode, TransportConfig};
