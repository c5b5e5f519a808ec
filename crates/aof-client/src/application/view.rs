//! Views: live handles on one cache key.
//!
//! A [`View`] registers itself in the [`Cache`] under its key.  When the key
//! is missing it asks a [`ResourceLoader`] to fetch it; when the cache changes
//! it re-reads the key and broadcasts a [`ViewEvent`].  A failed load never
//! reaches the caller; it is kept as the view's error until the next
//! notification clears it.
//!
//! Dropping a view (or calling [`View::dispose`]) deregisters it.  A load that
//! finishes afterwards still fills the cache but is otherwise ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use aof_core::ResourceKey;
use async_trait::async_trait;
use rmpv::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::warn;

use super::cache::{Cache, Subscriber, SubscriberId};
use super::loader::LoadError;

const VIEW_EVENT_CAPACITY: usize = 16;

/// Anything that can fetch a resource key into the cache.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Fetches `key`, storing the result in the cache where the handler does.
    async fn load(&self, key: &ResourceKey, data: Value) -> Result<Value, LoadError>;

    /// Whether a handler exists for `key`.
    fn can_load(&self, key: &ResourceKey) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewOptions {
    /// Keep returning the last seen value after the cache drops the key.
    pub keep_last_value: bool,
    /// Report streamed partial values while the full value is loading.
    pub accept_partials: bool,
}

#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// The key changed; carries the view's current value.
    Update(Option<Arc<Value>>),
    /// A transient value was broadcast for the key.
    Ping(Arc<Value>),
    /// The load failed.
    Error(LoadError),
}

struct ViewShared {
    this: Weak<ViewShared>,
    id: SubscriberId,
    key: ResourceKey,
    options: ViewOptions,
    cache: Weak<Cache>,
    loader: Arc<dyn ResourceLoader>,
    runtime: Handle,
    last_value: Mutex<Option<Arc<Value>>>,
    error: Mutex<Option<LoadError>>,
    disposed: AtomicBool,
    events: broadcast::Sender<ViewEvent>,
}

impl ViewShared {
    fn get(&self) -> Option<Arc<Value>> {
        let cache = self.cache.upgrade();
        let current = cache.as_ref().and_then(|c| c.get(&self.key));

        if self.options.keep_last_value {
            let mut last = lock(&self.last_value);
            match &current {
                None => return last.clone(),
                Some(value) => *last = Some(Arc::clone(value)),
            }
        }

        if self.options.accept_partials && current.is_none() {
            return cache.and_then(|c| c.get_partial(&self.key));
        }
        current
    }

    fn loaded(&self) -> bool {
        if self.options.keep_last_value && lock(&self.last_value).is_some() {
            return true;
        }
        self.cache.upgrade().is_some_and(|c| c.has(&self.key))
    }

    fn partial_loaded(&self) -> bool {
        self.loaded()
            || (self.options.accept_partials
                && self.cache.upgrade().is_some_and(|c| c.has_partial(&self.key)))
    }

    fn start_load(&self) {
        if !self.loader.can_load(&self.key) {
            return;
        }
        let loader = Arc::clone(&self.loader);
        let key = self.key.clone();
        let view = self.this.clone();
        self.runtime.spawn(async move {
            if let Err(e) = loader.load(&key, Value::Nil).await {
                if let Some(view) = view.upgrade() {
                    view.fail(e);
                }
            }
        });
    }

    fn fail(&self, error: LoadError) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        warn!("load of {} failed: {error}", self.key);
        *lock(&self.error) = Some(error.clone());
        let _ = self.events.send(ViewEvent::Error(error));
    }
}

impl Subscriber for ViewShared {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn accepts_partials(&self) -> bool {
        self.options.accept_partials
    }

    fn notify(&self, _key: &ResourceKey) {
        *lock(&self.error) = None;
        if !self.partial_loaded() {
            self.start_load();
        }
        let _ = self.events.send(ViewEvent::Update(self.get()));
    }

    fn ping(&self, _key: &ResourceKey, value: Arc<Value>) {
        let _ = self.events.send(ViewEvent::Ping(value));
    }
}

/// A live handle on one cache key.
pub struct View {
    shared: Arc<ViewShared>,
    cache: Arc<Cache>,
}

impl View {
    /// Registers a view on `key` and starts loading it if the cache lacks it.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        key: ResourceKey,
        options: ViewOptions,
        cache: Arc<Cache>,
        loader: Arc<dyn ResourceLoader>,
    ) -> Self {
        let (events, _) = broadcast::channel(VIEW_EVENT_CAPACITY);
        let shared = Arc::new_cyclic(|this| ViewShared {
            this: this.clone(),
            id: SubscriberId::new(),
            key: key.clone(),
            options,
            cache: Arc::downgrade(&cache),
            loader,
            runtime: Handle::current(),
            last_value: Mutex::new(None),
            error: Mutex::new(None),
            disposed: AtomicBool::new(false),
            events,
        });
        cache.register(key.clone(), Arc::clone(&shared) as Arc<dyn Subscriber>);

        if shared.loaded() {
            shared.notify(&key);
        } else {
            shared.start_load();
        }
        Self { shared, cache }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.shared.key
    }

    /// The current value, honoring the view's options.
    pub fn get(&self) -> Option<Arc<Value>> {
        self.shared.get()
    }

    pub fn loaded(&self) -> bool {
        self.shared.loaded()
    }

    pub fn partial_loaded(&self) -> bool {
        self.shared.partial_loaded()
    }

    /// Only a partial value is available.
    pub fn is_partial(&self) -> bool {
        self.partial_loaded() && !self.loaded()
    }

    pub fn error(&self) -> Option<LoadError> {
        lock(&self.shared.error).clone()
    }

    pub fn has_error(&self) -> bool {
        lock(&self.shared.error).is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.shared.events.subscribe()
    }

    /// Starts a fresh load regardless of what the cache holds.
    pub fn reload(&self) {
        self.shared.start_load();
    }

    /// Deregisters the view.  Idempotent.
    pub fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::AcqRel) {
            self.cache.deregister(&self.shared.key, self.shared.id);
        }
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Returns the cached value for `key`, loading it first when a handler exists.
///
/// # Errors
///
/// Returns the handler's [`LoadError`].
pub async fn lazy_load(
    cache: &Cache,
    loader: &dyn ResourceLoader,
    key: &ResourceKey,
) -> Result<Option<Arc<Value>>, LoadError> {
    if let Some(value) = cache.get(key) {
        return Ok(Some(value));
    }
    if loader.can_load(key) {
        return loader.load(key, Value::Nil).await.map(|v| Some(Arc::new(v)));
    }
    Ok(None)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Loader double: records every load and either fills the cache or fails.
    struct RecordingLoader {
        cache: Arc<Cache>,
        value: Value,
        should_fail: bool,
        loads: Mutex<Vec<ResourceKey>>,
    }

    impl RecordingLoader {
        fn new(cache: &Arc<Cache>, value: Value, should_fail: bool) -> Arc<Self> {
            Arc::new(Self {
                cache: Arc::clone(cache),
                value,
                should_fail,
                loads: Mutex::new(Vec::new()),
            })
        }

        fn load_count(&self) -> usize {
            self.loads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResourceLoader for RecordingLoader {
        async fn load(&self, key: &ResourceKey, _data: Value) -> Result<Value, LoadError> {
            self.loads.lock().unwrap().push(key.clone());
            if self.should_fail {
                return Err(LoadError::NotFound(key.to_string()));
            }
            self.cache.insert(key.clone(), self.value.clone());
            Ok(self.value.clone())
        }

        fn can_load(&self, key: &ResourceKey) -> bool {
            key.scheme() == Some("aof")
        }
    }

    fn cache() -> Arc<Cache> {
        Arc::new(Cache::new(Duration::from_secs(10)))
    }

    fn key() -> ResourceKey {
        ResourceKey::new("aof://t/h/1")
    }

    #[tokio::test]
    async fn test_missing_key_loads_once_and_updates() {
        // Arrange
        let cache = cache();
        let loader = RecordingLoader::new(&cache, Value::from("v"), false);

        // Act
        let view = View::new(key(), ViewOptions::default(), cache.clone(), loader.clone());
        let mut events = view.subscribe();
        let event = events.recv().await.unwrap();

        // Assert
        assert!(matches!(event, ViewEvent::Update(Some(v)) if *v == Value::from("v")));
        assert_eq!(loader.load_count(), 1);
        assert!(view.loaded());
    }

    #[tokio::test]
    async fn test_cached_key_does_not_load() {
        let cache = cache();
        cache.insert(key(), Value::from(1));
        let loader = RecordingLoader::new(&cache, Value::Nil, false);

        let view = View::new(key(), ViewOptions::default(), cache.clone(), loader.clone());
        tokio::task::yield_now().await;

        assert_eq!(loader.load_count(), 0);
        assert_eq!(view.get().as_deref(), Some(&Value::from(1)));
    }

    #[tokio::test]
    async fn test_failed_load_is_stored_and_cleared_by_next_update() {
        // Arrange
        let cache = cache();
        let loader = RecordingLoader::new(&cache, Value::Nil, true);
        let view = View::new(key(), ViewOptions::default(), cache.clone(), loader);
        let mut events = view.subscribe();

        // Act
        let event = events.recv().await.unwrap();

        // Assert
        assert!(matches!(event, ViewEvent::Error(LoadError::NotFound(_))));
        assert!(view.has_error());

        cache.insert(key(), Value::from(2));
        assert!(!view.has_error());
        assert_eq!(view.get().as_deref(), Some(&Value::from(2)));
    }

    #[tokio::test]
    async fn test_keep_last_value_survives_delete() {
        // Arrange
        let cache = cache();
        cache.insert(key(), Value::from("kept"));
        let loader = RecordingLoader::new(&cache, Value::Nil, false);
        let options = ViewOptions {
            keep_last_value: true,
            ..ViewOptions::default()
        };
        let view = View::new(key(), options, cache.clone(), loader.clone());

        // Act
        cache.delete(&key());

        // Assert
        assert!(view.loaded());
        assert_eq!(view.get().as_deref(), Some(&Value::from("kept")));
        tokio::task::yield_now().await;
        assert_eq!(loader.load_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_value_is_visible_until_full_value() {
        // Arrange: a failing loader keeps the full value away
        let cache = cache();
        let loader = RecordingLoader::new(&cache, Value::Nil, true);
        let options = ViewOptions {
            accept_partials: true,
            ..ViewOptions::default()
        };
        let view = View::new(key(), options, cache.clone(), loader);

        // Act
        cache.insert_partial(key(), Value::from("pre"));

        // Assert
        assert!(view.is_partial());
        assert_eq!(view.get().as_deref(), Some(&Value::from("pre")));

        cache.insert(key(), Value::from("full"));
        assert!(!view.is_partial());
        assert_eq!(view.get().as_deref(), Some(&Value::from("full")));
    }

    #[tokio::test]
    async fn test_delete_triggers_reload() {
        let cache = cache();
        cache.insert(key(), Value::from(1));
        let loader = RecordingLoader::new(&cache, Value::from(3), false);
        let view = View::new(key(), ViewOptions::default(), cache.clone(), loader.clone());
        let mut events = view.subscribe();

        cache.delete(&key());

        assert!(matches!(events.recv().await.unwrap(), ViewEvent::Update(None)));
        assert!(matches!(events.recv().await.unwrap(), ViewEvent::Update(Some(_))));
        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn test_ping_is_forwarded() {
        let cache = cache();
        cache.insert(key(), Value::Nil);
        let loader = RecordingLoader::new(&cache, Value::Nil, false);
        let view = View::new(key(), ViewOptions::default(), cache.clone(), loader);
        let mut events = view.subscribe();

        cache.ping(&key(), Value::from(5));

        assert!(matches!(events.recv().await.unwrap(), ViewEvent::Ping(v) if *v == Value::from(5)));
    }

    #[tokio::test]
    async fn test_dispose_deregisters_and_ignores_late_failure() {
        // Arrange
        let cache = cache();
        let loader = RecordingLoader::new(&cache, Value::Nil, true);
        let view = View::new(key(), ViewOptions::default(), cache.clone(), loader.clone());

        // Act
        view.dispose();
        tokio::task::yield_now().await;

        // Assert
        assert_eq!(cache.subscriber_count(&key()), 0);
        assert_eq!(loader.load_count(), 1);
        assert!(!view.has_error());
    }

    #[tokio::test]
    async fn test_drop_deregisters() {
        let cache = cache();
        cache.insert(key(), Value::Nil);
        let loader = RecordingLoader::new(&cache, Value::Nil, false);

        drop(View::new(key(), ViewOptions::default(), cache.clone(), loader));

        assert_eq!(cache.subscriber_count(&key()), 0);
    }

    #[tokio::test]
    async fn test_lazy_load_paths() {
        // Arrange
        let cache = cache();
        let loader = RecordingLoader::new(&cache, Value::from("loaded"), false);
        cache.insert(ResourceKey::new("aof://t/h/cached"), Value::from("cached"));

        // Act
        let cached = lazy_load(&cache, loader.as_ref(), &ResourceKey::new("aof://t/h/cached")).await;
        let loaded = lazy_load(&cache, loader.as_ref(), &ResourceKey::new("aof://t/h/new")).await;
        let foreign = lazy_load(&cache, loader.as_ref(), &ResourceKey::new("x://t/h")).await;

        // Assert
        assert_eq!(cached.unwrap().as_deref(), Some(&Value::from("cached")));
        assert_eq!(loaded.unwrap().as_deref(), Some(&Value::from("loaded")));
        assert_eq!(foreign.unwrap(), None);
        assert_eq!(loader.load_count(), 1);
    }
}
