//! Where the persisted unlock record lives.
//!
//! Two scopes exist:
//!
//! - **session**: held in process memory, gone when the client exits.  Clones
//!   of a [`LocalKeyStorage`] share it, so every crypto session in one process
//!   sees the same record.
//! - **durable**: the file `key_store` in the key-store directory (the config
//!   directory unless configured otherwise).
//!
//! At most one scope holds a record at a time: [`KeyStorage::set`] clears both
//! before writing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aof_core::crypto::StorageScope;
use thiserror::Error;
use tracing::debug;

use crate::domain::paths::KEY_STORE_ID;

/// File name of the durable scope.
pub const KEY_STORE_FILE: &str = "key_store";

#[derive(Debug, Error)]
pub enum KeyStorageError {
    #[error("I/O error accessing {id} at {path}: {source}")]
    Io {
        id: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Synchronous storage for the persisted unlock record.  Owned by the crypto
/// worker thread.
#[cfg_attr(test, mockall::automock)]
pub trait KeyStorage: Send {
    /// Reads one scope.  An absent record is `Ok(None)`.
    fn get(&self, scope: StorageScope) -> Result<Option<String>, KeyStorageError>;

    /// Clears both scopes, then writes `value` to `scope`.
    fn set(&mut self, scope: StorageScope, value: &str) -> Result<(), KeyStorageError>;

    /// Clears one scope.  Clearing an empty scope is not an error.
    fn remove(&mut self, scope: StorageScope) -> Result<(), KeyStorageError>;
}

/// [`KeyStorage`] backed by process memory and one file.
#[derive(Debug, Clone)]
pub struct LocalKeyStorage {
    durable_path: PathBuf,
    session: Arc<Mutex<Option<String>>>,
}

impl LocalKeyStorage {
    /// Stores the durable scope in `dir/key_store`.
    pub fn new(dir: &Path) -> Self {
        Self {
            durable_path: dir.join(KEY_STORE_FILE),
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn durable_path(&self) -> &Path {
        &self.durable_path
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn io_error(&self, source: std::io::Error) -> KeyStorageError {
        KeyStorageError::Io {
            id: KEY_STORE_ID,
            path: self.durable_path.clone(),
            source,
        }
    }
}

impl KeyStorage for LocalKeyStorage {
    fn get(&self, scope: StorageScope) -> Result<Option<String>, KeyStorageError> {
        match scope {
            StorageScope::Session => Ok(self.session_slot().clone()),
            StorageScope::Durable => match std::fs::read_to_string(&self.durable_path) {
                Ok(content) => Ok(Some(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(self.io_error(e)),
            },
        }
    }

    fn set(&mut self, scope: StorageScope, value: &str) -> Result<(), KeyStorageError> {
        self.remove(StorageScope::Session)?;
        self.remove(StorageScope::Durable)?;
        match scope {
            StorageScope::Session => *self.session_slot() = Some(value.to_string()),
            StorageScope::Durable => {
                if let Some(dir) = self.durable_path.parent() {
                    std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
                }
                std::fs::write(&self.durable_path, value).map_err(|e| self.io_error(e))?;
            }
        }
        debug!("{KEY_STORE_ID} written to {scope:?} scope");
        Ok(())
    }

    fn remove(&mut self, scope: StorageScope) -> Result<(), KeyStorageError> {
        match scope {
            StorageScope::Session => {
                *self.session_slot() = None;
                Ok(())
            }
            StorageScope::Durable => match std::fs::remove_file(&self.durable_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_error(e)),
            },
        }
    }
}
