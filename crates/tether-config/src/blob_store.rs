// Durable credential blob stores: one file per key, or the system keyring.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tether_core::{BlobStore, CoreError, CredentialsBlob};
use tracing::debug;

/// Keyring service name for stored session blobs.
pub const KEYRING_SERVICE: &str = "tether";

fn persistence(action: &str, key: &str, err: impl std::fmt::Display) -> CoreError {
    CoreError::Persistence {
        message: format!("{action} '{key}': {err}"),
    }
}

// ── File store ──────────────────────────────────────────────────────

/// Stores each blob in `<root>/<key>.blob`, written atomically with
/// owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for `key`. Characters outside `[A-Za-z0-9._-]` become `_`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{name}.blob"))
    }
}

impl BlobStore for FileBlobStore {
    fn load(&self, key: &str) -> Result<Option<CredentialsBlob>, CoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(CredentialsBlob::new(raw))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence("reading", key, e)),
        }
    }

    fn save(&self, key: &str, blob: &CredentialsBlob) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.root).map_err(|e| persistence("creating dir for", key, e))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("blob.tmp");
        std::fs::write(&tmp, blob.expose()).map_err(|e| persistence("writing", key, e))?;
        restrict_permissions(&tmp).map_err(|e| persistence("securing", key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| persistence("replacing", key, e))?;
        debug!(key, path = %path.display(), "credentials blob saved");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                debug!(key, "credentials blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence("deleting", key, e)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ── Keyring store ───────────────────────────────────────────────────

/// Stores blobs in the platform keyring under one service name.
#[derive(Debug, Clone)]
pub struct KeyringBlobStore {
    service: String,
}

impl KeyringBlobStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, CoreError> {
        keyring::Entry::new(&self.service, key).map_err(|e| persistence("opening keyring entry", key, e))
    }
}

impl BlobStore for KeyringBlobStore {
    fn load(&self, key: &str) -> Result<Option<CredentialsBlob>, CoreError> {
        match self.entry(key)?.get_password() {
            Ok(raw) => Ok(Some(CredentialsBlob::new(raw))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(persistence("reading keyring entry", key, e)),
        }
    }

    fn save(&self, key: &str, blob: &CredentialsBlob) -> Result<(), CoreError> {
        self.entry(key)?
            .set_password(blob.expose())
            .map_err(|e| persistence("writing keyring entry", key, e))
    }

    fn delete(&self, key: &str) -> Result<(), CoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(persistence("deleting keyring entry", key, e)),
        }
    }
}
