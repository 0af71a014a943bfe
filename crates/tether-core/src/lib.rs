// tether-core: Stateful device-session manager between tether-api and
// consumers (CLI, host adapters).

pub mod config;
pub mod error;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod status;
pub mod store;
pub mod suppression;
pub mod tasks;
pub mod update;

mod listener;
mod reconcile;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::SessionConfig;
pub use error::{CoreError, ErrorClass, HandlerError};
pub use persistence::{BlobStore, MemoryBlobStore};
pub use registry::{DependentHandler, DeviceRegistry, RegistrationId};
pub use session::{RefreshOutcome, Session, SkipReason};
pub use status::{ConnectionState, PushState, Status, StatusDetail, ThingStatus};
pub use store::SnapshotStore;
pub use suppression::{SuppressionTable, Verdict};
pub use tasks::{Debouncer, TaskGroup};
pub use update::DeviceUpdate;

// Re-export the endpoint contract so consumers need only one crate.
pub use tether_api::{
    Activity, CommandAck, CredentialsBlob, DetailKind, DeviceCommand, DeviceId, DeviceSnapshot,
    Notification, PushEvent, RemoteEndpoint,
};
