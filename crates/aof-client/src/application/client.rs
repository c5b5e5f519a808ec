//! The client service: one cache, one socket, one crypto session.
//!
//! [`Client::start`] wires the components together and spawns two background
//! tasks:
//!
//! - the **dispatcher**, which mirrors the connection state into
//!   `aof://connection/state` and applies server push events to the cache;
//! - the **sweeper**, which drops cache entries nobody watches.
//!
//! ```text
//!   Connection ──state──┐
//!              ──events─┴─▶ dispatcher ──▶ Cache ◀── sweeper
//! ```
//!
//! Everything else happens on the caller's task: views and loads reach the
//! server through the [`Loader`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aof_core::ResourceKey;
use rmpv::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::Cache;
use super::events::handle_event;
use super::loader::{LoadContext, LoadError, Loader, RemoteKeySource};
use super::session::{PasswordPrompt, SessionCrypto, StorageFactory};
use super::view::{self, ResourceLoader, View, ViewOptions};
use crate::domain::config::config_dir;
use crate::domain::paths::CONNECTION_STATE;
use crate::domain::{ClientConfig, ConfigError};
use crate::infrastructure::connection::{
    Connection, ConnectionConfig, ConnectionState, ServerEvent,
};
use crate::infrastructure::key_storage::{KeyStorage, LocalKeyStorage};

/// A running client.  Dropping it without [`shutdown`](Self::shutdown) leaves
/// the background tasks running until the runtime stops.
pub struct Client {
    cache: Arc<Cache>,
    connection: Connection,
    session: SessionCrypto,
    loader: Arc<Loader>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Builds the components and starts the background tasks.  The socket is
    /// opened lazily by the first request.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when no key-store
    /// directory is configured and the platform default cannot be resolved.
    pub fn start(
        config: &ClientConfig,
        prompt: Arc<dyn PasswordPrompt>,
    ) -> Result<Self, ConfigError> {
        let key_store_dir = match &config.session.key_store_dir {
            Some(dir) => dir.clone(),
            None => config_dir()?,
        };

        let cache = Arc::new(Cache::new(config.cache.partial_timeout()));
        let (connection, events) = Connection::new(ConnectionConfig::from(&config.server));
        let keys = Arc::new(RemoteKeySource::new(Arc::clone(&cache), connection.clone()));
        let session = SessionCrypto::new(
            Arc::clone(&cache),
            keys,
            prompt,
            local_storage(key_store_dir),
            config.session.kdf_rounds,
        );
        let loader = Arc::new(Loader::new(LoadContext {
            cache: Arc::clone(&cache),
            connection: connection.clone(),
            session: session.clone(),
        }));

        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&cache),
            connection.watch_state(),
            events,
        ));
        let sweeper = cache.spawn_sweeper(config.cache.sweep_interval());
        info!("client started for {}", config.server.url);

        Ok(Self {
            cache,
            connection,
            session,
            loader,
            tasks: Mutex::new(vec![dispatcher, sweeper]),
        })
    }

    /// Opens a view on `key`.
    pub fn view(&self, key: impl Into<ResourceKey>, options: ViewOptions) -> View {
        View::new(
            key.into(),
            options,
            Arc::clone(&self.cache),
            Arc::clone(&self.loader) as Arc<dyn ResourceLoader>,
        )
    }

    /// Runs the handler for `key` with `data` as its arguments.
    ///
    /// # Errors
    ///
    /// See [`Loader::load`].
    pub async fn load(
        &self,
        key: impl Into<ResourceKey>,
        data: Value,
    ) -> Result<Value, LoadError> {
        self.loader.load(&key.into(), data).await
    }

    /// Returns the cached value for `key`, loading it first if needed.
    ///
    /// # Errors
    ///
    /// See [`Loader::load`].
    pub async fn lazy_load(
        &self,
        key: impl Into<ResourceKey>,
    ) -> Result<Option<Arc<Value>>, LoadError> {
        view::lazy_load(&self.cache, self.loader.as_ref(), &key.into()).await
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn session(&self) -> &SessionCrypto {
        &self.session
    }

    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    /// Closes the socket, stops the background tasks, and tears down the
    /// cache.  Safe to call more than once.
    pub async fn shutdown(&self) {
        self.connection.close().await;
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.cache.teardown();
        info!("client stopped");
    }
}

/// A storage factory whose instances share one session scope.
fn local_storage(dir: PathBuf) -> StorageFactory {
    let storage = LocalKeyStorage::new(&dir);
    Arc::new(move || Box::new(storage.clone()) as Box<dyn KeyStorage>)
}

/// Mirrors connection state into the cache and applies server events until
/// both sources are gone.
async fn dispatch(
    cache: Arc<Cache>,
    mut state: watch::Receiver<ConnectionState>,
    mut events: mpsc::Receiver<ServerEvent>,
) {
    let state_key = ResourceKey::new(CONNECTION_STATE);
    let initial = *state.borrow_and_update();
    cache.insert(state_key.clone(), Value::from(initial.as_str()));

    let mut state_open = true;
    let mut events_open = true;
    while state_open || events_open {
        tokio::select! {
            changed = state.changed(), if state_open => {
                if changed.is_err() {
                    state_open = false;
                    continue;
                }
                let current = *state.borrow_and_update();
                debug!("connection state: {}", current.as_str());
                cache.insert(state_key.clone(), Value::from(current.as_str()));
            }
            event = events.recv(), if events_open => match event {
                Some(ServerEvent::Push { name, payload }) => handle_event(&cache, &name, &payload),
                Some(ServerEvent::ProtocolError(reason)) => {
                    warn!("server stream violated the protocol: {reason}");
                }
                None => events_open = false,
            },
        }
    }
    debug!("dispatcher stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use aof_core::UnlockFailure;

    use super::*;
    use crate::application::events::USER_DID_SUBSCRIBE_SOURCE;
    use crate::application::loader::map;
    use crate::application::session::PromptResponse;
    use crate::domain::paths::SOURCES_LIST_USER;

    struct CancelingPrompt;

    #[async_trait]
    impl PasswordPrompt for CancelingPrompt {
        async fn request_password(&self, _: Option<UnlockFailure>) -> Option<PromptResponse> {
            None
        }
    }

    fn config(dir: &std::path::Path) -> ClientConfig {
        let mut config = ClientConfig::default();
        // Nothing listens here; these tests never open the socket.
        config.server.url = "ws://127.0.0.1:9/api/session".to_string();
        config.session.key_store_dir = Some(dir.to_path_buf());
        config
    }

    async fn settle(cache: &Cache, key: &ResourceKey) -> Option<Arc<Value>> {
        for _ in 0..50 {
            if let Some(value) = cache.get(key) {
                return Some(value);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_start_mirrors_initial_connection_state() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();

        // Act
        let client = Client::start(&config(dir.path()), Arc::new(CancelingPrompt)).unwrap();

        // Assert
        let state = settle(client.cache(), &ResourceKey::new(CONNECTION_STATE)).await;
        assert_eq!(state.as_deref(), Some(&Value::from("closed")));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_of_unknown_route_is_no_handler() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::start(&config(dir.path()), Arc::new(CancelingPrompt)).unwrap();

        let result = client.load("aof://nothing/here", Value::Nil).await;

        assert!(matches!(result, Err(LoadError::NoHandler(_))));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_lazy_load_returns_cached_value_without_a_request() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let client = Client::start(&config(dir.path()), Arc::new(CancelingPrompt)).unwrap();
        let key = ResourceKey::new(SOURCES_LIST_USER);
        client.cache().insert(key.clone(), Value::Array(Vec::new()));

        // Act
        let value = client.lazy_load(key).await.unwrap();

        // Assert
        assert_eq!(value.as_deref(), Some(&Value::Array(Vec::new())));
        assert_eq!(client.connection().state(), ConnectionState::Closed);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatcher_applies_pushed_events() {
        // Arrange
        let cache = Arc::new(Cache::new(Duration::from_secs(10)));
        let list = ResourceKey::new(SOURCES_LIST_USER);
        cache.insert(list.clone(), Value::Array(Vec::new()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (events_tx, events_rx) = mpsc::channel(4);
        let task = tokio::spawn(dispatch(Arc::clone(&cache), state_rx, events_rx));

        // Act
        events_tx
            .send(ServerEvent::Push {
                name: USER_DID_SUBSCRIBE_SOURCE.to_string(),
                payload: map([("source", Value::from("d:///a"))]),
            })
            .await
            .unwrap();
        drop(events_tx);
        drop(state_tx);
        task.await.unwrap();

        // Assert
        assert_eq!(
            cache.get(&list).as_deref(),
            Some(&Value::Array(vec![Value::from("d:///a")]))
        );
    }

    #[tokio::test]
    async fn test_dispatcher_mirrors_state_changes() {
        // Arrange
        let cache = Arc::new(Cache::new(Duration::from_secs(10)));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (events_tx, events_rx) = mpsc::channel(4);
        let task = tokio::spawn(dispatch(Arc::clone(&cache), state_rx, events_rx));

        // Act
        state_tx.send(ConnectionState::Opening).unwrap();
        state_tx.send(ConnectionState::Open).unwrap();
        drop(state_tx);
        drop(events_tx);
        task.await.unwrap();

        // Assert
        assert_eq!(
            cache.get(&ResourceKey::new(CONNECTION_STATE)).as_deref(),
            Some(&Value::from("open"))
        );
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::start(&config(dir.path()), Arc::new(CancelingPrompt)).unwrap();

        client.shutdown().await;
        client.shutdown().await;

        assert_eq!(client.connection().state(), ConnectionState::Closed);
    }
}
