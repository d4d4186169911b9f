//! Local persistence: the session record `{session_id, last_activity}` and,
//! for clients that survive a restart, the identity provider's tokens.
//!
//! No profile data is written anywhere.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{identity::AuthTokens, models::PersistedSession};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError>;
    fn save(&self, session: &PersistedSession) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// In-process storage; lives exactly as long as the process, like a browser
/// tab's session storage.
#[derive(Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        Ok(*self.slot.lock())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        *self.slot.lock() = Some(*session);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.slot.lock().take();
        Ok(())
    }
}

/// Where the identity client keeps its tokens between runs.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<AuthTokens>, StorageError>;
    fn save(&self, tokens: &AuthTokens) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn remove(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// JSON file storage used by the console between runs.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        read_json(&self.path)
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        write_json(&self.path, session)
    }

    fn clear(&self) -> Result<(), StorageError> {
        remove(&self.path)
    }
}

/// Provider tokens in a JSON file readable only by the owner.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Token file kept next to a session file: `session.json` becomes
    /// `session.tokens.json`.
    pub fn beside(session_path: &Path) -> Self {
        Self::new(session_path.with_extension("tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<AuthTokens>, StorageError> {
        read_json(&self.path)
    }

    fn save(&self, tokens: &AuthTokens) -> Result<(), StorageError> {
        write_json(&self.path, tokens)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        remove(&self.path)
    }
}
