//! The crypto session: unlocking the user's secret key once and using it.
//!
//! # The unlock pipeline (for beginners)
//!
//! User data is encrypted with a secret key that the server stores *armored*
//! (encrypted under a key derived from the user's password).  Unlocking runs
//! through these phases:
//!
//! ```text
//! Uninitialized
//!   → DerivingClientCapability   fetch the 32-byte client key, start the worker
//!   → AwaitingSecretMaterial     fetch the armored secret key
//!   → Unlocking                  PBKDF2 + AES-GCM on the worker thread
//!   → Ready                      (or UnlockFailed)
//! ```
//!
//! If a password was persisted earlier (under the client key) the first
//! unlock attempt succeeds without asking.  Otherwise the password comes from
//! the login form or from the [`PasswordPrompt`], which is asked again after
//! every failure until it succeeds or the user cancels.
//!
//! Concurrent callers share one attempt: the pipeline is a memoized
//! `Shared` future.  A failed attempt is discarded so the next call starts
//! over.  A cancellation is sticky for background callers; only a
//! user-initiated call starts a new attempt after one.
//!
//! Every status change is mirrored into the cache at `aof://c_session_state`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aof_core::crypto::{Envelope, EnvelopeError, Persistence, UnlockFailure, CLIENT_KEY_LEN};
use aof_core::ResourceKey;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use rmpv::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::Cache;
use crate::domain::paths::SESSION_STATE;
use crate::infrastructure::crypto_worker::{CryptoWorker, WorkerError};
use crate::infrastructure::key_storage::KeyStorage;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The user dismissed the password prompt.
    #[error("decryption canceled by the user")]
    Canceled,

    #[error("client key has {0} bytes, expected 32")]
    ClientKeyLength(usize),

    /// The client key or the armored secret key could not be fetched.
    #[error("could not obtain key material: {0}")]
    KeyMaterial(String),

    #[error("unlock failed: {0}")]
    Unlock(UnlockFailure),

    #[error("crypto worker unavailable: {0}")]
    Worker(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl From<WorkerError> for SessionError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::Unlock(failure) => SessionError::Unlock(failure),
            WorkerError::Stopped => SessionError::Worker(e.to_string()),
        }
    }
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Where the key material comes from.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// The server-issued key that protects the persisted password.
    async fn client_key(&self) -> Result<Vec<u8>, SessionError>;

    /// The armored secret key.
    async fn secret_key(&self) -> Result<String, SessionError>;
}

/// Asks the user for the secret-key password.
#[async_trait]
pub trait PasswordPrompt: Send + Sync {
    /// `last_failure` is the reason the previous attempt failed, `None` on
    /// the first prompt.  Returns `None` when the user cancels.
    async fn request_password(&self, last_failure: Option<UnlockFailure>)
        -> Option<PromptResponse>;
}

#[derive(Debug, Clone)]
pub struct PromptResponse {
    pub password: String,
    pub persistence: Persistence,
}

/// Password entered on the login form, tried when no persisted password works.
#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub password: String,
    /// Persist durably instead of for this process only.
    pub persist: bool,
}

/// Builds the key storage handed to each new crypto worker.
pub type StorageFactory = Arc<dyn Fn() -> Box<dyn KeyStorage> + Send + Sync>;

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    DerivingClientCapability,
    AwaitingSecretMaterial,
    Unlocking,
    Ready,
    UnlockFailed,
}

/// Observable session status, mirrored into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub ready: bool,
    pub decrypting_key: bool,
    pub user_canceled: bool,
    /// Decryptions in flight.
    pub decrypting: u32,
    /// Encryptions in flight.
    pub encrypting: u32,
}

impl SessionStatus {
    pub fn to_value(self) -> Value {
        Value::Map(vec![
            (Value::from("ready"), Value::from(self.ready)),
            (Value::from("decrypting_key"), Value::from(self.decrypting_key)),
            (Value::from("user_canceled"), Value::from(self.user_canceled)),
            (Value::from("decrypting"), Value::from(self.decrypting)),
            (Value::from("encrypting"), Value::from(self.encrypting)),
        ])
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// An unlocked session.  Holds the worker thread that owns the secret key.
pub struct UnlockedSession {
    worker: CryptoWorker,
}

type SessionResult = Result<Arc<UnlockedSession>, SessionError>;
type SessionFuture = Shared<BoxFuture<'static, SessionResult>>;

#[derive(Default)]
struct State {
    status: SessionStatus,
    phase: SessionPhase,
    current: Option<SessionFuture>,
    /// Bumped for every new attempt; a failing attempt only clears itself.
    attempt: u64,
}

struct Inner {
    cache: Arc<Cache>,
    keys: Arc<dyn KeySource>,
    prompt: Arc<dyn PasswordPrompt>,
    storage: StorageFactory,
    kdf_rounds: u32,
    state: Mutex<State>,
}

/// Handle to the crypto session.  Clones share the same session.
#[derive(Clone)]
pub struct SessionCrypto {
    inner: Arc<Inner>,
}

impl SessionCrypto {
    pub fn new(
        cache: Arc<Cache>,
        keys: Arc<dyn KeySource>,
        prompt: Arc<dyn PasswordPrompt>,
        storage: StorageFactory,
        kdf_rounds: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                keys,
                prompt,
                storage,
                kdf_rounds,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.state).status
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.inner.state).phase
    }

    /// Returns the unlocked session, unlocking it first if needed.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Canceled`] if the user canceled, either now or
    ///   earlier when `user_initiated` is false.
    /// - Any failure fetching key material or running the unlock.
    pub async fn session(&self, user_initiated: bool) -> SessionResult {
        self.session_with(user_initiated, None).await
    }

    /// Unlocks with the password just entered on the login form.
    ///
    /// # Errors
    ///
    /// See [`session`](Self::session).
    pub async fn unlock_with_login(&self, credentials: LoginCredentials) -> SessionResult {
        self.session_with(true, Some(credentials)).await
    }

    /// Seals `plaintext` under a fresh nonce.
    ///
    /// # Errors
    ///
    /// Fails if the session cannot be unlocked or encryption fails.
    pub async fn encrypt(&self, plaintext: Vec<u8>) -> Result<Envelope, SessionError> {
        self.inner.update(|s| s.encrypting += 1);
        let result = async {
            let session = self.session(false).await?;
            let nonce = Envelope::seal_nonce()?;
            let ciphertext = session.worker.encrypt(nonce, plaintext).await?;
            Ok(Envelope { nonce, ciphertext })
        }
        .await;
        self.inner.update(|s| s.encrypting = s.encrypting.saturating_sub(1));
        result
    }

    /// Opens an envelope.
    ///
    /// # Errors
    ///
    /// Fails if the session cannot be unlocked or the ciphertext does not
    /// authenticate.
    pub async fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>, SessionError> {
        self.inner.update(|s| s.decrypting += 1);
        let result = async {
            let session = self.session(false).await?;
            Ok(session
                .worker
                .decrypt(envelope.nonce, envelope.ciphertext.clone())
                .await?)
        }
        .await;
        self.inner.update(|s| s.decrypting = s.decrypting.saturating_sub(1));
        result
    }

    /// Drops the session and erases any persisted password.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Worker`] if no worker could be started to
    /// clear storage.
    pub async fn forget(&self) -> Result<(), SessionError> {
        let current = {
            let mut state = lock(&self.inner.state);
            state.phase = SessionPhase::Uninitialized;
            state.attempt += 1;
            state.current.take()
        };
        self.inner.update(|s| *s = SessionStatus::default());

        match current.and_then(|f| f.peek().cloned()) {
            Some(Ok(session)) => session.worker.forget_persisted().await?,
            _ => {
                let worker = CryptoWorker::spawn((self.inner.storage)(), self.inner.kdf_rounds)
                    .map_err(|e| SessionError::Worker(e.to_string()))?;
                worker.forget_persisted().await?;
            }
        }
        info!("crypto session forgotten");
        Ok(())
    }

    async fn session_with(
        &self,
        user_initiated: bool,
        login: Option<LoginCredentials>,
    ) -> SessionResult {
        let attempt = {
            let mut state = lock(&self.inner.state);
            match state.current.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    state.attempt += 1;
                    let id = state.attempt;
                    let inner = Arc::clone(&self.inner);
                    let attempt = async move {
                        let result = inner.establish(user_initiated, login).await;
                        if let Err(e) = &result {
                            warn!("crypto session unavailable: {e}");
                            let still_current = {
                                let mut state = lock(&inner.state);
                                let still_current = state.attempt == id;
                                if still_current {
                                    state.current = None;
                                }
                                still_current
                            };
                            if still_current {
                                inner.set_phase(SessionPhase::UnlockFailed);
                                inner.update(|s| s.decrypting_key = false);
                            }
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    state.current = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }
}

impl Inner {
    async fn establish(
        &self,
        user_initiated: bool,
        login: Option<LoginCredentials>,
    ) -> SessionResult {
        if !user_initiated && lock(&self.state).status.user_canceled {
            return Err(SessionError::Canceled);
        }

        self.update(|s| s.decrypting_key = true);
        self.set_phase(SessionPhase::DerivingClientCapability);
        let client_key = self.keys.client_key().await?;
        if client_key.len() != CLIENT_KEY_LEN {
            return Err(SessionError::ClientKeyLength(client_key.len()));
        }
        let worker = CryptoWorker::spawn((self.storage)(), self.kdf_rounds)
            .map_err(|e| SessionError::Worker(e.to_string()))?;
        if worker.create_session(client_key).await? {
            debug!("restored persisted secret-key password");
        }

        self.set_phase(SessionPhase::AwaitingSecretMaterial);
        let armored = self.keys.secret_key().await?;

        self.set_phase(SessionPhase::Unlocking);
        if let Err(first) = worker.unlock(armored.clone()).await {
            let first = unlock_failure(first)?;
            match login {
                Some(credentials) => {
                    worker.set_password(credentials.password).await?;
                    let persistence = if credentials.persist {
                        Persistence::Durable
                    } else {
                        Persistence::Session
                    };
                    worker.set_persistence(persistence).await?;
                    worker.unlock(armored).await?;
                }
                None => self.prompt_until_unlocked(&worker, armored, first).await?,
            }
        }

        self.set_phase(SessionPhase::Ready);
        self.update(|s| {
            s.ready = true;
            s.decrypting_key = false;
            s.user_canceled = false;
        });
        info!("crypto session ready");
        Ok(Arc::new(UnlockedSession { worker }))
    }

    async fn prompt_until_unlocked(
        &self,
        worker: &CryptoWorker,
        armored: String,
        first: UnlockFailure,
    ) -> Result<(), SessionError> {
        // nothing was tried yet when no password was available
        let mut last_failure = (first != UnlockFailure::NoPassword).then_some(first);
        loop {
            let Some(response) = self.prompt.request_password(last_failure).await else {
                self.update(|s| s.user_canceled = true);
                return Err(SessionError::Canceled);
            };
            worker.set_password(response.password).await?;
            worker.set_persistence(response.persistence).await?;
            match worker.unlock(armored.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => last_failure = Some(unlock_failure(e)?),
            }
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        lock(&self.state).phase = phase;
    }

    /// Applies `change` to the status and mirrors the result into the cache.
    fn update(&self, change: impl FnOnce(&mut SessionStatus)) {
        let mut state = lock(&self.state);
        change(&mut state.status);
        self.cache
            .insert(ResourceKey::new(SESSION_STATE), state.status.to_value());
    }
}

fn unlock_failure(e: WorkerError) -> Result<UnlockFailure, SessionError> {
    match e {
        WorkerError::Unlock(failure) => Ok(failure),
        WorkerError::Stopped => Err(e.into()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::time::Duration;

    use aof_core::crypto::{armor_secret_key, NONCE_LEN, SECRET_KEY_LEN};

    use super::*;
    use crate::infrastructure::key_storage::LocalKeyStorage;

    const ROUNDS: u32 = 8;
    const PASSWORD: &str = "correct horse";

    /// Key source double: counts fetches, optionally serves a bad client key.
    struct RecordingKeySource {
        client_key: Vec<u8>,
        client_fetches: Mutex<u32>,
        secret_fetches: Mutex<u32>,
    }

    impl RecordingKeySource {
        fn new(client_key: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                client_key,
                client_fetches: Mutex::new(0),
                secret_fetches: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl KeySource for RecordingKeySource {
        async fn client_key(&self) -> Result<Vec<u8>, SessionError> {
            *self.client_fetches.lock().unwrap() += 1;
            tokio::task::yield_now().await;
            Ok(self.client_key.clone())
        }

        async fn secret_key(&self) -> Result<String, SessionError> {
            *self.secret_fetches.lock().unwrap() += 1;
            Ok(armor_secret_key(
                &[5u8; SECRET_KEY_LEN],
                PASSWORD,
                b"salt-salt",
                &[2u8; NONCE_LEN],
                ROUNDS,
            )
            .unwrap())
        }
    }

    /// Key source whose first client-key fetch waits for `release` and then
    /// fails.  Later fetches go to the wrapped source.
    struct GatedKeySource {
        gate: tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
        keys: Arc<RecordingKeySource>,
    }

    #[async_trait]
    impl KeySource for GatedKeySource {
        async fn client_key(&self) -> Result<Vec<u8>, SessionError> {
            let gate = self.gate.lock().await.take();
            match gate {
                Some(gate) => {
                    let _ = gate.await;
                    Err(SessionError::KeyMaterial("server went away".to_string()))
                }
                None => self.keys.client_key().await,
            }
        }

        async fn secret_key(&self) -> Result<String, SessionError> {
            self.keys.secret_key().await
        }
    }

    /// Prompt double: replays scripted answers and records what it was told.
    struct RecordingPrompt {
        answers: Mutex<VecDeque<Option<PromptResponse>>>,
        seen: Mutex<Vec<Option<UnlockFailure>>>,
    }

    impl RecordingPrompt {
        fn new(answers: Vec<Option<&str>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(
                    answers
                        .into_iter()
                        .map(|a| {
                            a.map(|password| PromptResponse {
                                password: password.to_string(),
                                persistence: Persistence::None,
                            })
                        })
                        .collect(),
                ),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Option<UnlockFailure>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PasswordPrompt for RecordingPrompt {
        async fn request_password(
            &self,
            last_failure: Option<UnlockFailure>,
        ) -> Option<PromptResponse> {
            self.seen.lock().unwrap().push(last_failure);
            self.answers.lock().unwrap().pop_front().flatten()
        }
    }

    fn storage_in(dir: &Path) -> StorageFactory {
        let storage = LocalKeyStorage::new(dir);
        Arc::new(move || Box::new(storage.clone()) as Box<dyn KeyStorage>)
    }

    fn crypto(
        cache: &Arc<Cache>,
        keys: &Arc<RecordingKeySource>,
        prompt: &Arc<RecordingPrompt>,
        dir: &Path,
    ) -> SessionCrypto {
        SessionCrypto::new(
            Arc::clone(cache),
            keys.clone(),
            prompt.clone(),
            storage_in(dir),
            ROUNDS,
        )
    }

    fn cache() -> Arc<Cache> {
        Arc::new(Cache::new(Duration::from_secs(10)))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_unlock() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let keys = RecordingKeySource::new(vec![1u8; 32]);
        let prompt = RecordingPrompt::new(vec![Some(PASSWORD)]);
        let session = crypto(&cache(), &keys, &prompt, dir.path());

        // Act
        let (a, b, c) = tokio::join!(
            session.session(false),
            session.session(false),
            session.session(true)
        );

        // Assert
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(*keys.client_fetches.lock().unwrap(), 1);
        assert_eq!(*keys.secret_fetches.lock().unwrap(), 1);
        assert_eq!(prompt.seen(), vec![None]);
        assert_eq!(session.phase(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_stale_failed_attempt_keeps_newer_session() {
        // Arrange: the first attempt hangs on its client-key fetch
        let dir = tempfile::tempdir().unwrap();
        let keys = RecordingKeySource::new(vec![1u8; 32]);
        let (release, gate) = tokio::sync::oneshot::channel();
        let gated = Arc::new(GatedKeySource {
            gate: tokio::sync::Mutex::new(Some(gate)),
            keys: Arc::clone(&keys),
        });
        let prompt = RecordingPrompt::new(vec![Some(PASSWORD)]);
        let session = SessionCrypto::new(
            cache(),
            gated.clone(),
            prompt.clone(),
            storage_in(dir.path()),
            ROUNDS,
        );
        let stale = {
            let session = session.clone();
            tokio::spawn(async move { session.session(false).await })
        };
        while gated.gate.lock().await.is_some() {
            tokio::task::yield_now().await;
        }

        // Act: forget, unlock afresh, then let the old attempt fail
        session.forget().await.unwrap();
        let fresh = session.session(true).await;
        release.send(()).unwrap();
        let stale = stale.await.unwrap();

        // Assert
        assert!(fresh.is_ok());
        assert!(matches!(stale, Err(SessionError::KeyMaterial(_))));
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(session.session(false).await.is_ok());
        assert_eq!(*keys.client_fetches.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_is_reported_to_next_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let keys = RecordingKeySource::new(vec![1u8; 32]);
        let prompt = RecordingPrompt::new(vec![Some("wrong"), Some(PASSWORD)]);
        let session = crypto(&cache(), &keys, &prompt, dir.path());

        let result = session.session(true).await;

        assert!(result.is_ok());
        assert_eq!(prompt.seen(), vec![None, Some(UnlockFailure::Decryption)]);
    }

    #[tokio::test]
    async fn test_cancel_is_sticky_for_background_callers() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let keys = RecordingKeySource::new(vec![1u8; 32]);
        let prompt = RecordingPrompt::new(vec![None, Some(PASSWORD)]);
        let session = crypto(&cache(), &keys, &prompt, dir.path());

        // Act
        let canceled = session.session(false).await;
        let background = session.session(false).await;
        let user = session.session(true).await;

        // Assert
        assert_eq!(canceled.err(), Some(SessionError::Canceled));
        assert_eq!(background.err(), Some(SessionError::Canceled));
        assert_eq!(*keys.client_fetches.lock().unwrap(), 2);
        assert!(user.is_ok());
        assert!(!session.status().user_canceled);
    }

    #[tokio::test]
    async fn test_bad_client_key_fails_and_is_retried_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let keys = RecordingKeySource::new(vec![1u8; 16]);
        let prompt = RecordingPrompt::new(vec![]);
        let session = crypto(&cache(), &keys, &prompt, dir.path());

        let first = session.session(true).await;
        let second = session.session(true).await;

        assert_eq!(first.err(), Some(SessionError::ClientKeyLength(16)));
        assert_eq!(second.err(), Some(SessionError::ClientKeyLength(16)));
        assert_eq!(*keys.client_fetches.lock().unwrap(), 2);
        assert_eq!(session.phase(), SessionPhase::UnlockFailed);
        assert!(!session.status().decrypting_key);
    }

    #[tokio::test]
    async fn test_login_password_persists_for_next_process() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let keys = RecordingKeySource::new(vec![1u8; 32]);
        let prompt = RecordingPrompt::new(vec![]);
        let first = crypto(&cache(), &keys, &prompt, dir.path());

        // Act
        first
            .unlock_with_login(LoginCredentials {
                password: PASSWORD.to_string(),
                persist: true,
            })
            .await
            .unwrap();
        let restarted = crypto(&cache(), &keys, &prompt, dir.path());
        let restored = restarted.session(false).await;

        // Assert: neither session had to prompt
        assert!(restored.is_ok());
        assert!(prompt.seen().is_empty());
    }

    #[tokio::test]
    async fn test_forget_erases_persisted_password() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let keys = RecordingKeySource::new(vec![1u8; 32]);
        let prompt = RecordingPrompt::new(vec![None]);
        let session = crypto(&cache(), &keys, &prompt, dir.path());
        session
            .unlock_with_login(LoginCredentials {
                password: PASSWORD.to_string(),
                persist: true,
            })
            .await
            .unwrap();

        // Act
        session.forget().await.unwrap();
        let after = session.session(true).await;

        // Assert: the prompt is needed again
        assert_eq!(after.err(), Some(SessionError::Canceled));
        assert_eq!(prompt.seen(), vec![None]);
    }

    #[tokio::test]
    async fn test_envelope_round_trip_and_counters() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let cache = cache();
        let keys = RecordingKeySource::new(vec![1u8; 32]);
        let prompt = RecordingPrompt::new(vec![Some(PASSWORD)]);
        let session = crypto(&cache, &keys, &prompt, dir.path());

        for len in [0usize, 1, 12, 4096, 10_000] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

            // Act
            let envelope = session.encrypt(plaintext.clone()).await.unwrap();
            let wire = envelope.to_bytes();
            let opened = session.decrypt(&Envelope::split(&wire).unwrap()).await.unwrap();

            // Assert
            assert_eq!(opened, plaintext, "length {len}");
        }
        let status = session.status();
        assert_eq!((status.encrypting, status.decrypting), (0, 0));
        assert!(status.ready);
    }

    #[tokio::test]
    async fn test_status_is_mirrored_into_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache();
        let keys = RecordingKeySource::new(vec![1u8; 32]);
        let prompt = RecordingPrompt::new(vec![Some(PASSWORD)]);
        let session = crypto(&cache, &keys, &prompt, dir.path());

        session.session(true).await.unwrap();

        let mirrored = cache.get(&ResourceKey::new(SESSION_STATE)).unwrap();
        assert!(session.status().ready);
        assert_eq!(*mirrored, session.status().to_value());
    }
}
