// ── Credentials persistence ──
//
// The session persists exactly one opaque blob. Durable stores (file,
// system keyring) live in tether-config; the in-memory store here backs
// tests and ephemeral sessions.

use dashmap::DashMap;
use tether_api::CredentialsBlob;

use crate::error::CoreError;

/// Key/value store for the serialized credentials blob.
pub trait BlobStore: Send + Sync + 'static {
    fn load(&self, key: &str) -> Result<Option<CredentialsBlob>, CoreError>;
    fn save(&self, key: &str, blob: &CredentialsBlob) -> Result<(), CoreError>;
    fn delete(&self, key: &str) -> Result<(), CoreError>;
}

/// Storage key of a session's credentials blob.
pub fn session_key(session_id: &str) -> String {
    format!("{session_id}/session")
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, CredentialsBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one blob.
    pub fn with_blob(key: impl Into<String>, blob: CredentialsBlob) -> Self {
        let store = Self::new();
        store.blobs.insert(key.into(), blob);
        store
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, key: &str) -> Result<Option<CredentialsBlob>, CoreError> {
        Ok(self.blobs.get(key).map(|b| b.value().clone()))
    }

    fn save(&self, key: &str, blob: &CredentialsBlob) -> Result<(), CoreError> {
        self.blobs.insert(key.to_owned(), blob.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.blobs.remove(key);
        Ok(())
    }
}
