//! Dedicated thread that owns the key session.
//!
//! PBKDF2 with 150 000 rounds takes long enough to stall an async runtime, so
//! all key-session work runs on one OS thread.  The thread owns the
//! [`KeySession`] and the [`KeyStorage`]; nothing is shared with it.  Commands
//! are moved in over a `std::sync::mpsc` channel and every command carries a
//! `tokio::sync::oneshot` sender for its reply.
//!
//! Around every command that can touch persisted state the worker loads a
//! fresh storage snapshot into the session and afterwards applies the
//! mutations the session recorded.
//!
//! The thread exits when the last [`CryptoWorker`] handle is dropped.

use std::sync::mpsc;
use std::thread;

use aof_core::crypto::{
    KeySession, Persistence, StorageMutation, StorageMutations, StorageScope, UnlockFailure,
    NONCE_LEN,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::key_storage::KeyStorage;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error(transparent)]
    Unlock(#[from] UnlockFailure),

    #[error("crypto worker is not running")]
    Stopped,
}

type Reply<T> = oneshot::Sender<Result<T, UnlockFailure>>;

enum Command {
    CreateSession {
        client_key: Vec<u8>,
        reply: Reply<bool>,
    },
    SetPassword {
        password: String,
        reply: Reply<()>,
    },
    SetPersistence {
        persistence: Persistence,
        reply: Reply<()>,
    },
    Unlock {
        armored: String,
        reply: Reply<()>,
    },
    Encrypt {
        nonce: [u8; NONCE_LEN],
        plaintext: Vec<u8>,
        reply: Reply<Vec<u8>>,
    },
    Decrypt {
        nonce: [u8; NONCE_LEN],
        ciphertext: Vec<u8>,
        reply: Reply<Vec<u8>>,
    },
    ForgetPersisted {
        reply: Reply<()>,
    },
}

/// Handle to the crypto worker thread.
pub struct CryptoWorker {
    tx: mpsc::Sender<Command>,
    thread: thread::JoinHandle<()>,
}

impl CryptoWorker {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the OS refuses to create the thread.
    pub fn spawn(storage: Box<dyn KeyStorage>, kdf_rounds: u32) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("aof-crypto".to_string())
            .spawn(move || run(KeySession::with_kdf_rounds(kdf_rounds), storage, rx))?;
        Ok(Self { tx, thread })
    }

    /// Sets the client key and restores a persisted password if one exists.
    /// Returns whether a password was restored.
    pub async fn create_session(&self, client_key: Vec<u8>) -> Result<bool, WorkerError> {
        self.ask(|reply| Command::CreateSession { client_key, reply })
            .await
    }

    pub async fn set_password(&self, password: String) -> Result<(), WorkerError> {
        self.ask(|reply| Command::SetPassword { password, reply })
            .await
    }

    pub async fn set_persistence(&self, persistence: Persistence) -> Result<(), WorkerError> {
        self.ask(|reply| Command::SetPersistence { persistence, reply })
            .await
    }

    /// Unwraps `armored` with the current password and persists the password
    /// according to the persistence mode.
    pub async fn unlock(&self, armored: String) -> Result<(), WorkerError> {
        self.ask(|reply| Command::Unlock { armored, reply }).await
    }

    pub async fn encrypt(
        &self,
        nonce: [u8; NONCE_LEN],
        plaintext: Vec<u8>,
    ) -> Result<Vec<u8>, WorkerError> {
        self.ask(|reply| Command::Encrypt {
            nonce,
            plaintext,
            reply,
        })
        .await
    }

    pub async fn decrypt(
        &self,
        nonce: [u8; NONCE_LEN],
        ciphertext: Vec<u8>,
    ) -> Result<Vec<u8>, WorkerError> {
        self.ask(|reply| Command::Decrypt {
            nonce,
            ciphertext,
            reply,
        })
        .await
    }

    /// Removes the persisted record from both scopes.
    pub async fn forget_persisted(&self) -> Result<(), WorkerError> {
        self.ask(|reply| Command::ForgetPersisted { reply }).await
    }

    /// Stops the worker and waits for the thread to finish.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the worker thread panicked.
    pub fn join(self) -> thread::Result<()> {
        drop(self.tx);
        self.thread.join()
    }

    async fn ask<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| WorkerError::Stopped)?;
        rx.await
            .map_err(|_| WorkerError::Stopped)?
            .map_err(WorkerError::Unlock)
    }
}

// ── Worker thread ─────────────────────────────────────────────────────────────

fn run(mut session: KeySession, mut storage: Box<dyn KeyStorage>, rx: mpsc::Receiver<Command>) {
    debug!("crypto worker started");
    while let Ok(command) = rx.recv() {
        match command {
            Command::CreateSession { client_key, reply } => {
                let result = load_storage(&mut session, storage.as_ref()).and_then(|()| {
                    session.set_client_key(&client_key)?;
                    Ok(session.init_from_persisted())
                });
                flush(&mut session, storage.as_mut());
                let _ = reply.send(result);
            }
            Command::SetPassword { password, reply } => {
                session.set_password(password);
                let _ = reply.send(Ok(()));
            }
            Command::SetPersistence { persistence, reply } => {
                session.set_persistence(persistence);
                let _ = reply.send(Ok(()));
            }
            Command::Unlock { armored, reply } => {
                let result = load_storage(&mut session, storage.as_ref()).and_then(|()| {
                    session.set_armored_secret_key(armored);
                    session.unlock()?;
                    if let Err(failure) = session.maybe_persist() {
                        warn!("unlocked, but the password was not persisted: {failure}");
                    }
                    Ok(())
                });
                flush(&mut session, storage.as_mut());
                let _ = reply.send(result);
            }
            Command::Encrypt {
                nonce,
                plaintext,
                reply,
            } => {
                let _ = reply.send(session.encrypt(&nonce, &plaintext));
            }
            Command::Decrypt {
                nonce,
                ciphertext,
                reply,
            } => {
                let _ = reply.send(session.decrypt(&nonce, &ciphertext));
            }
            Command::ForgetPersisted { reply } => {
                session.forget_persisted();
                flush(&mut session, storage.as_mut());
                let _ = reply.send(Ok(()));
            }
        }
    }
    debug!("crypto worker stopped");
}

fn load_storage(session: &mut KeySession, storage: &dyn KeyStorage) -> Result<(), UnlockFailure> {
    let read = |scope| {
        storage.get(scope).map_err(|e| {
            warn!("{e}");
            UnlockFailure::StorageRead
        })
    };
    let session_value = read(StorageScope::Session)?;
    let durable_value = read(StorageScope::Durable)?;
    session.storage_mut().load(session_value, durable_value);
    Ok(())
}

/// Applies recorded mutations.  Removals go first so a write to one scope is
/// never undone by clearing it afterwards.
fn flush(session: &mut KeySession, storage: &mut dyn KeyStorage) {
    apply_mutations(session.storage_mut().take_mutations(), storage);
}

fn apply_mutations(mutations: StorageMutations, storage: &mut dyn KeyStorage) {
    let scoped = [
        (StorageScope::Session, mutations.session),
        (StorageScope::Durable, mutations.durable),
    ];
    for (scope, mutation) in &scoped {
        if let Some(StorageMutation::Remove) = mutation {
            if let Err(e) = storage.remove(*scope) {
                warn!("{e}");
            }
        }
    }
    for (scope, mutation) in &scoped {
        if let Some(StorageMutation::Set(value)) = mutation {
            if let Err(e) = storage.set(*scope, value) {
                warn!("{e}");
            }
        }
    }
}
