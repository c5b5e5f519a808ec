//! Client-side cryptography.
//!
//! - [`envelope`] – the `nonce || ciphertext` wire form of encrypted user data.
//! - [`key_session`] – the password-protected secret key, its unlock, and the
//!   optional persistence of the unlock password under the server-issued
//!   client key.
//! - [`storage`] – the in-memory view of the two persistence scopes that the
//!   key session reads from and records mutations into.
//!
//! Nothing here performs I/O.  The host (the crypto worker in `aof-client`)
//! loads the storage snapshot before each operation and applies the recorded
//! mutations afterwards.

pub mod envelope;
pub mod key_session;
pub mod storage;

pub use envelope::{Envelope, EnvelopeError, NONCE_LEN};
pub use key_session::{
    armor_secret_key, KeySession, Persistence, UnlockFailure, CLIENT_KEY_LEN,
    DEFAULT_KDF_ROUNDS, SECRET_KEY_LEN,
};
pub use storage::{StorageMutation, StorageMutations, StorageProxy, StorageScope};
