//! The password-protected secret key and its unlock state.
//!
//! # How the keys fit together (for beginners)
//!
//! The server stores every user's *secret key* wrapped ("armored") under a key
//! derived from the user's password:
//!
//! ```text
//! armored = base64(salt) "$" base64(nonce(12) || AES-256-GCM(derived, secret_key))
//! derived = PBKDF2-HMAC-SHA512(password, salt, rounds)
//! ```
//!
//! The unwrapped secret key then encrypts and decrypts user data envelopes.
//!
//! So the user does not have to type the password on every start, the
//! password may be *persisted*.  The persisted record is itself encrypted with
//! the server-issued *client key*, which is only handed out to an
//! authenticated session, and tagged with the SHA-512 of the armored key it
//! belongs to:
//!
//! ```text
//! stored = base64(msgpack { ver, ct_n, ct = AES-256-GCM(client_key, msgpack { armor_hash, password }) })
//! ```
//!
//! If the server later hands out a different armored key (password change),
//! the hash no longer matches and the session asks for the password again.

use aes_gcm::aead::{Aead, Nonce};
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::envelope::NONCE_LEN;
use super::storage::{StorageProxy, StorageScope};

/// Length of the server-issued client key.
pub const CLIENT_KEY_LEN: usize = 32;

/// Length of the unwrapped secret key.
pub const SECRET_KEY_LEN: usize = 32;

/// Length of the PBKDF2 output used to unwrap the secret key.
const DERIVED_KEY_LEN: usize = 32;

/// PBKDF2 iteration count used by the server when armoring secret keys.
pub const DEFAULT_KDF_ROUNDS: u32 = 150_000;

/// Version tag of the persisted record.  Records with any other version are
/// discarded.
pub const STORE_VERSION: u32 = 1;

const ARMOR_SEPARATOR: char = '$';

/// Why an unlock, persistence, or cipher operation failed.
///
/// [`code`](Self::code) returns the stable identifier a password prompt uses
/// to pick a localized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnlockFailure {
    #[error("no secret key has been provided")]
    NoSecretKey,
    #[error("a password is required")]
    NoPassword,
    #[error("the secret key salt could not be read")]
    SaltRead,
    #[error("the secret key ciphertext could not be read")]
    CiphertextRead,
    #[error("decryption failed")]
    Decryption,
    #[error("no client key has been provided")]
    NoClientKey,
    #[error("the client key must be 32 bytes")]
    ClientKeyLength,
    #[error("encoding failed")]
    Encoding,
    #[error("encryption failed")]
    Encryption,
    #[error("persisted key storage could not be read")]
    StorageRead,
    #[error("the secret key must be 32 bytes")]
    SecretKeyLength,
    #[error("the nonce must be 12 bytes")]
    NonceLength,
}

impl UnlockFailure {
    /// Stable machine-readable identifier.
    pub fn code(self) -> &'static str {
        match self {
            UnlockFailure::NoSecretKey => "no_secret_key",
            UnlockFailure::NoPassword => "no_password",
            UnlockFailure::SaltRead => "salt_read_error",
            UnlockFailure::CiphertextRead => "ct_read_error",
            UnlockFailure::Decryption => "decryption",
            UnlockFailure::NoClientKey => "no_client_key",
            UnlockFailure::ClientKeyLength => "client_key_length",
            UnlockFailure::Encoding => "encoding",
            UnlockFailure::Encryption => "encryption",
            UnlockFailure::StorageRead => "storage_read_error",
            UnlockFailure::SecretKeyLength => "secret_key_length",
            UnlockFailure::NonceLength => "nonce_length",
        }
    }
}

/// Where, if anywhere, the unlock password is persisted after a successful
/// unlock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    #[default]
    None,
    Session,
    Durable,
}

impl Persistence {
    fn scope(self) -> Option<StorageScope> {
        match self {
            Persistence::None => None,
            Persistence::Session => Some(StorageScope::Session),
            Persistence::Durable => Some(StorageScope::Durable),
        }
    }
}

enum SecretKeyAccess {
    None,
    Password(Zeroizing<String>),
    /// Restored from storage; only valid for the armored key it was saved with.
    Persisted {
        armor_hash: Vec<u8>,
        password: Zeroizing<String>,
    },
}

impl SecretKeyAccess {
    fn password(&self) -> Option<&str> {
        match self {
            SecretKeyAccess::None => None,
            SecretKeyAccess::Password(password) => Some(password),
            SecretKeyAccess::Persisted { password, .. } => Some(password),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredKey {
    ver: u32,
    ct_n: Vec<u8>,
    ct: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct StoredAccess {
    armor_hash: Vec<u8>,
    password: String,
}

/// Key material and unlock state for one crypto session.
pub struct KeySession {
    storage: StorageProxy,
    client_key: Option<Zeroizing<[u8; CLIENT_KEY_LEN]>>,
    armored: Option<String>,
    access: SecretKeyAccess,
    secret_key: Option<Zeroizing<Vec<u8>>>,
    persistence: Persistence,
    kdf_rounds: u32,
}

impl Default for KeySession {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySession {
    /// Creates an empty session using [`DEFAULT_KDF_ROUNDS`].
    pub fn new() -> Self {
        Self::with_kdf_rounds(DEFAULT_KDF_ROUNDS)
    }

    /// Creates an empty session with a custom PBKDF2 iteration count.  It must
    /// match the count the server armored the secret key with.
    pub fn with_kdf_rounds(kdf_rounds: u32) -> Self {
        Self {
            storage: StorageProxy::default(),
            client_key: None,
            armored: None,
            access: SecretKeyAccess::None,
            secret_key: None,
            persistence: Persistence::None,
            kdf_rounds,
        }
    }

    /// The storage snapshot.  The host loads it before an operation and takes
    /// its mutations afterwards.
    pub fn storage_mut(&mut self) -> &mut StorageProxy {
        &mut self.storage
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn set_persistence(&mut self, persistence: Persistence) {
        self.persistence = persistence;
    }

    /// Sets the server-issued client key.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockFailure::ClientKeyLength`] unless the key is exactly
    /// [`CLIENT_KEY_LEN`] bytes.
    pub fn set_client_key(&mut self, key: &[u8]) -> Result<(), UnlockFailure> {
        let key: [u8; CLIENT_KEY_LEN] = key.try_into().map_err(|_| UnlockFailure::ClientKeyLength)?;
        self.client_key = Some(Zeroizing::new(key));
        Ok(())
    }

    pub fn set_armored_secret_key(&mut self, armored: String) {
        self.armored = Some(armored);
    }

    /// Sets the password supplied by the user, replacing any restored one.
    pub fn set_password(&mut self, password: String) {
        self.access = SecretKeyAccess::Password(Zeroizing::new(password));
    }

    pub fn is_unlocked(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Unwraps the armored secret key with the available password.
    ///
    /// # Errors
    ///
    /// - [`UnlockFailure::NoSecretKey`] if no armored key was set.
    /// - [`UnlockFailure::NoPassword`] if there is no password, or the restored
    ///   one belongs to a different armored key.
    /// - [`UnlockFailure::SaltRead`] / [`UnlockFailure::CiphertextRead`] for a
    ///   malformed armored key.
    /// - [`UnlockFailure::Decryption`] for a wrong password or corrupt key.
    pub fn unlock(&mut self) -> Result<(), UnlockFailure> {
        let armored = self.armored.as_deref().ok_or(UnlockFailure::NoSecretKey)?;
        let password = match &self.access {
            SecretKeyAccess::None => return Err(UnlockFailure::NoPassword),
            SecretKeyAccess::Password(password) => password,
            SecretKeyAccess::Persisted {
                armor_hash,
                password,
            } => {
                if armor_hash.as_slice() != Sha512::digest(armored.as_bytes()).as_slice() {
                    debug!("persisted password belongs to a different secret key");
                    return Err(UnlockFailure::NoPassword);
                }
                password
            }
        };

        let mut parts = armored.split(ARMOR_SEPARATOR);
        let salt = parts
            .next()
            .and_then(|s| STANDARD.decode(s).ok())
            .ok_or(UnlockFailure::SaltRead)?;
        let sealed = parts
            .next()
            .and_then(|s| STANDARD.decode(s).ok())
            .ok_or(UnlockFailure::CiphertextRead)?;
        // nonce plus at least one byte of ciphertext
        if sealed.len() <= NONCE_LEN {
            return Err(UnlockFailure::CiphertextRead);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let derived = derive_key(password, &salt, self.kdf_rounds)?;
        let cipher = Aes256Gcm::new_from_slice(derived.as_slice()).map_err(|_| UnlockFailure::Decryption)?;
        let secret = cipher
            .decrypt(Nonce::<Aes256Gcm>::from_slice(nonce), ciphertext)
            .map_err(|_| UnlockFailure::Decryption)?;

        self.secret_key = Some(Zeroizing::new(secret));
        Ok(())
    }

    /// Persists the unlock password under the client key, if a persistence
    /// scope is selected.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockFailure::NoClientKey`], [`UnlockFailure::NoSecretKey`],
    /// [`UnlockFailure::NoPassword`], [`UnlockFailure::Encoding`], or
    /// [`UnlockFailure::Encryption`].
    pub fn maybe_persist(&mut self) -> Result<(), UnlockFailure> {
        let Some(scope) = self.persistence.scope() else {
            return Ok(());
        };
        let client_key = self.client_key.as_ref().ok_or(UnlockFailure::NoClientKey)?;
        let armored = self.armored.as_deref().ok_or(UnlockFailure::NoSecretKey)?;
        let password = self.access.password().ok_or(UnlockFailure::NoPassword)?;

        let access = StoredAccess {
            armor_hash: Sha512::digest(armored.as_bytes()).to_vec(),
            password: password.to_owned(),
        };
        let plain = Zeroizing::new(rmp_serde::to_vec(&access).map_err(|_| UnlockFailure::Encoding)?);
        drop(Zeroizing::new(access.password));

        let cipher = Aes256Gcm::new_from_slice(client_key.as_slice()).map_err(|_| UnlockFailure::Encryption)?;
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|_| UnlockFailure::Encryption)?;
        let ct = cipher
            .encrypt(Nonce::<Aes256Gcm>::from_slice(&nonce), plain.as_slice())
            .map_err(|_| UnlockFailure::Encryption)?;

        let record = StoredKey {
            ver: STORE_VERSION,
            ct_n: nonce.to_vec(),
            ct,
        };
        let encoded = rmp_serde::to_vec(&record).map_err(|_| UnlockFailure::Encoding)?;
        self.storage.set(scope, STANDARD.encode(encoded));
        debug!("persisted unlock password to {scope:?} storage");
        Ok(())
    }

    /// Restores a persisted password, trying durable storage first and session
    /// storage second.
    ///
    /// Sets the persistence mode to the scope the record came from.  Returns
    /// `false` (and persistence `None`) if nothing usable was found.  A restored
    /// password still has to pass [`unlock`](Self::unlock).
    pub fn init_from_persisted(&mut self) -> bool {
        for (scope, persistence) in [
            (StorageScope::Durable, Persistence::Durable),
            (StorageScope::Session, Persistence::Session),
        ] {
            let record = match self.read_record(scope) {
                Ok(record) => record,
                Err(failure) => {
                    warn!("ignoring {scope:?} key storage: {failure}");
                    None
                }
            };
            if let Some(record) = record {
                self.persistence = persistence;
                if self.restore_access(record) {
                    return true;
                }
            }
        }
        self.persistence = Persistence::None;
        false
    }

    /// Removes any persisted record from both scopes.
    pub fn forget_persisted(&mut self) {
        self.storage.remove(StorageScope::Durable);
        self.storage.remove(StorageScope::Session);
        self.persistence = Persistence::None;
    }

    /// Encrypts `plaintext` under the unlocked secret key.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockFailure::NoSecretKey`], [`UnlockFailure::SecretKeyLength`],
    /// [`UnlockFailure::NonceLength`], or [`UnlockFailure::Encryption`].
    pub fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, UnlockFailure> {
        let cipher = self.data_cipher(nonce)?;
        cipher
            .encrypt(Nonce::<Aes256Gcm>::from_slice(nonce), plaintext)
            .map_err(|_| UnlockFailure::Encryption)
    }

    /// Decrypts `ciphertext` under the unlocked secret key.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockFailure::NoSecretKey`], [`UnlockFailure::SecretKeyLength`],
    /// [`UnlockFailure::NonceLength`], or [`UnlockFailure::Decryption`].
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, UnlockFailure> {
        let cipher = self.data_cipher(nonce)?;
        cipher
            .decrypt(Nonce::<Aes256Gcm>::from_slice(nonce), ciphertext)
            .map_err(|_| UnlockFailure::Decryption)
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn data_cipher(&self, nonce: &[u8]) -> Result<Aes256Gcm, UnlockFailure> {
        let secret = self.secret_key.as_ref().ok_or(UnlockFailure::NoSecretKey)?;
        if secret.len() != SECRET_KEY_LEN {
            return Err(UnlockFailure::SecretKeyLength);
        }
        if nonce.len() != NONCE_LEN {
            return Err(UnlockFailure::NonceLength);
        }
        Aes256Gcm::new_from_slice(secret.as_slice()).map_err(|_| UnlockFailure::SecretKeyLength)
    }

    fn read_record(&mut self, scope: StorageScope) -> Result<Option<StoredKey>, UnlockFailure> {
        let Some(text) = self.storage.get(scope) else {
            return Ok(None);
        };
        let bytes = STANDARD.decode(text).map_err(|_| UnlockFailure::StorageRead)?;
        let record: StoredKey = rmp_serde::from_slice(&bytes).map_err(|_| UnlockFailure::StorageRead)?;
        if record.ver != STORE_VERSION {
            debug!("discarding key record with version {}", record.ver);
            self.storage.remove(scope);
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn restore_access(&mut self, record: StoredKey) -> bool {
        let Some(client_key) = self.client_key.as_ref() else {
            return false;
        };
        if record.ct_n.len() != NONCE_LEN {
            return false;
        }
        let Ok(cipher) = Aes256Gcm::new_from_slice(client_key.as_slice()) else {
            return false;
        };
        let Ok(plain) = cipher.decrypt(Nonce::<Aes256Gcm>::from_slice(&record.ct_n), record.ct.as_slice())
        else {
            return false;
        };
        let plain = Zeroizing::new(plain);
        match rmp_serde::from_slice::<StoredAccess>(&plain) {
            Ok(access) => {
                self.access = SecretKeyAccess::Persisted {
                    armor_hash: access.armor_hash,
                    password: Zeroizing::new(access.password),
                };
                true
            }
            Err(_) => false,
        }
    }
}

fn derive_key(
    password: &str,
    salt: &[u8],
    rounds: u32,
) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, UnlockFailure> {
    let mut derived = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha512>>(password.as_bytes(), salt, rounds, derived.as_mut_slice())
        .map_err(|_| UnlockFailure::Decryption)?;
    Ok(derived)
}

/// Armors `secret_key` under `password` the way the server does.
///
/// Used to build fixtures and by tooling that provisions keys.
///
/// # Errors
///
/// Returns [`UnlockFailure::Encryption`] if the cipher cannot be built.
pub fn armor_secret_key(
    secret_key: &[u8],
    password: &str,
    salt: &[u8],
    nonce: &[u8; NONCE_LEN],
    rounds: u32,
) -> Result<String, UnlockFailure> {
    let derived = derive_key(password, salt, rounds).map_err(|_| UnlockFailure::Encryption)?;
    let cipher = Aes256Gcm::new_from_slice(derived.as_slice()).map_err(|_| UnlockFailure::Encryption)?;
    let ct = cipher
        .encrypt(Nonce::<Aes256Gcm>::from_slice(nonce), secret_key)
        .map_err(|_| UnlockFailure::Encryption)?;
    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ct);
    Ok(format!(
        "{}{ARMOR_SEPARATOR}{}",
        STANDARD.encode(salt),
        STANDARD.encode(sealed)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::storage::StorageMutation;

    const ROUNDS: u32 = 16;
    const SECRET: [u8; SECRET_KEY_LEN] = [0x5E; SECRET_KEY_LEN];
    const CLIENT_KEY: [u8; CLIENT_KEY_LEN] = [0xC1; CLIENT_KEY_LEN];

    fn armored(password: &str) -> String {
        armor_secret_key(&SECRET, password, b"salt-1234", &[9u8; NONCE_LEN], ROUNDS).unwrap()
    }

    fn session_with_key(password: &str) -> KeySession {
        let mut session = KeySession::with_kdf_rounds(ROUNDS);
        session.set_client_key(&CLIENT_KEY).unwrap();
        session.set_armored_secret_key(armored(password));
        session
    }

    // ── Unlock ────────────────────────────────────────────────────────────────

    #[test]
    fn test_unlock_with_correct_password_succeeds() {
        // Arrange
        let mut session = session_with_key("hunter2");
        session.set_password("hunter2".into());

        // Act
        let result = session.unlock();

        // Assert
        assert_eq!(result, Ok(()));
        assert!(session.is_unlocked());
    }

    #[test]
    fn test_unlock_with_wrong_password_is_decryption_failure() {
        let mut session = session_with_key("hunter2");
        session.set_password("wrong".into());
        assert_eq!(session.unlock(), Err(UnlockFailure::Decryption));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn test_unlock_without_password_or_key() {
        let mut session = KeySession::with_kdf_rounds(ROUNDS);
        assert_eq!(session.unlock(), Err(UnlockFailure::NoSecretKey));
        session.set_armored_secret_key(armored("pw"));
        assert_eq!(session.unlock(), Err(UnlockFailure::NoPassword));
    }

    #[test]
    fn test_unlock_rejects_malformed_armor() {
        let mut session = KeySession::with_kdf_rounds(ROUNDS);
        session.set_password("pw".into());

        session.set_armored_secret_key("!!!$AAAA".into());
        assert_eq!(session.unlock(), Err(UnlockFailure::SaltRead));

        session.set_armored_secret_key("c2FsdA==".into());
        assert_eq!(session.unlock(), Err(UnlockFailure::CiphertextRead));

        // twelve bytes of nonce and no ciphertext
        session.set_armored_secret_key(format!("c2FsdA==${}", STANDARD.encode([0u8; 12])));
        assert_eq!(session.unlock(), Err(UnlockFailure::CiphertextRead));
    }

    #[test]
    fn test_client_key_must_be_32_bytes() {
        let mut session = KeySession::new();
        assert_eq!(session.set_client_key(&[0u8; 31]), Err(UnlockFailure::ClientKeyLength));
        assert_eq!(session.set_client_key(&[0u8; 32]), Ok(()));
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    #[test]
    fn test_persisted_password_restores_in_new_session() {
        // Arrange: unlock once with durable persistence
        let mut first = session_with_key("pw");
        first.set_password("pw".into());
        first.set_persistence(Persistence::Durable);
        first.unlock().unwrap();
        first.maybe_persist().unwrap();
        let mutations = first.storage_mut().take_mutations();
        let Some(StorageMutation::Set(stored)) = mutations.durable else {
            panic!("expected a durable write, got {mutations:?}");
        };

        // Act: a fresh session sees the stored record
        let mut second = session_with_key("pw");
        second.storage_mut().load(None, Some(stored));
        let restored = second.init_from_persisted();

        // Assert
        assert!(restored);
        assert_eq!(second.persistence(), Persistence::Durable);
        assert_eq!(second.unlock(), Ok(()));
    }

    #[test]
    fn test_persisted_password_for_other_armor_requires_password() {
        // Arrange
        let mut first = session_with_key("old");
        first.set_password("old".into());
        first.set_persistence(Persistence::Session);
        first.unlock().unwrap();
        first.maybe_persist().unwrap();
        let Some(StorageMutation::Set(stored)) = first.storage_mut().take_mutations().session else {
            panic!("expected a session write");
        };

        // Act: the server now hands out a key armored under a new password
        let mut second = session_with_key("new");
        second.storage_mut().load(Some(stored), None);
        assert!(second.init_from_persisted());
        let result = second.unlock();

        // Assert
        assert_eq!(result, Err(UnlockFailure::NoPassword));
    }

    #[test]
    fn test_persistence_none_writes_nothing() {
        let mut session = session_with_key("pw");
        session.set_password("pw".into());
        session.unlock().unwrap();
        session.maybe_persist().unwrap();
        assert!(session.storage_mut().take_mutations().is_empty());
    }

    #[test]
    fn test_init_from_persisted_with_garbage_falls_back_to_none() {
        let mut session = session_with_key("pw");
        session.storage_mut().load(Some("not base64 at all".into()), None);
        assert!(!session.init_from_persisted());
        assert_eq!(session.persistence(), Persistence::None);
    }

    #[test]
    fn test_init_from_persisted_discards_wrong_version() {
        // Arrange
        let record = StoredKey {
            ver: STORE_VERSION + 1,
            ct_n: vec![0; NONCE_LEN],
            ct: vec![1, 2, 3],
        };
        let stored = STANDARD.encode(rmp_serde::to_vec(&record).unwrap());
        let mut session = session_with_key("pw");
        session.storage_mut().load(None, Some(stored));

        // Act
        let restored = session.init_from_persisted();

        // Assert
        assert!(!restored);
        assert_eq!(
            session.storage_mut().take_mutations().durable,
            Some(StorageMutation::Remove)
        );
    }

    #[test]
    fn test_forget_persisted_removes_both_scopes() {
        let mut session = session_with_key("pw");
        session.forget_persisted();
        let mutations = session.storage_mut().take_mutations();
        assert_eq!(mutations.durable, Some(StorageMutation::Remove));
        assert_eq!(mutations.session, Some(StorageMutation::Remove));
    }

    // ── Data cipher ───────────────────────────────────────────────────────────

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        // Arrange
        let mut session = session_with_key("pw");
        session.set_password("pw".into());
        session.unlock().unwrap();
        let nonce = [3u8; NONCE_LEN];

        // Act
        let ct = session.encrypt(&nonce, b"user data").unwrap();
        let pt = session.decrypt(&nonce, &ct).unwrap();

        // Assert
        assert_eq!(pt, b"user data");
    }

    #[test]
    fn test_cipher_requires_unlock_and_valid_nonce() {
        let mut session = session_with_key("pw");
        assert_eq!(
            session.encrypt(&[0u8; NONCE_LEN], b"x"),
            Err(UnlockFailure::NoSecretKey)
        );
        session.set_password("pw".into());
        session.unlock().unwrap();
        assert_eq!(session.decrypt(&[0u8; 8], b"x"), Err(UnlockFailure::NonceLength));
    }

    #[test]
    fn test_failure_codes_are_stable() {
        assert_eq!(UnlockFailure::CiphertextRead.code(), "ct_read_error");
        assert_eq!(UnlockFailure::NoPassword.code(), "no_password");
    }
}
