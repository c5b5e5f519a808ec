//! The reactive key/value store.
//!
//! # How notification works (for beginners)
//!
//! Every [`View`](super::view::View) registers itself under the key it
//! watches.  The cache keeps that reverse index (`key → subscribers`) and, on
//! every write or delete of a key, calls each subscriber of exactly that key.
//!
//! Two locks are involved:
//!
//! - the **data lock** guards the maps and is never held while a subscriber
//!   runs, so subscribers may read the cache from inside a notification;
//! - the **mutation lock** is held for the whole "change + notify" sequence,
//!   so notifications of two mutations never interleave.
//!
//! A subscriber must not mutate the cache synchronously from inside a
//! notification; it spawns a task instead.
//!
//! # Garbage collection
//!
//! [`Cache::sweep`] drops every value and partial whose key has no
//! subscriber.  [`Cache::spawn_sweeper`] runs it periodically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use aof_core::ResourceKey;
use rmpv::Value;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Identity of one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that watches cache keys.
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Whether partial values should trigger [`notify`](Self::notify).
    fn accepts_partials(&self) -> bool {
        false
    }

    /// The value (or partial) under `key` changed or was removed.
    fn notify(&self, key: &ResourceKey);

    /// A transient value was broadcast for `key` without being stored.
    fn ping(&self, key: &ResourceKey, value: Arc<Value>);
}

struct PartialEntry {
    value: Arc<Value>,
    inserted_at: Instant,
}

type SubscriberSet = HashMap<SubscriberId, Arc<dyn Subscriber>>;

#[derive(Default)]
struct Store {
    entries: HashMap<ResourceKey, Arc<Value>>,
    partials: HashMap<ResourceKey, PartialEntry>,
    subscribers: HashMap<ResourceKey, SubscriberSet>,
}

impl Store {
    fn subscribers_of(&self, key: &ResourceKey) -> Vec<Arc<dyn Subscriber>> {
        self.subscribers
            .get(key)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }
}

pub struct Cache {
    store: Mutex<Store>,
    mutation: Mutex<()>,
    partial_timeout: Duration,
}

impl Cache {
    pub fn new(partial_timeout: Duration) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            mutation: Mutex::new(()),
            partial_timeout,
        }
    }

    // ── Values ────────────────────────────────────────────────────────────────

    /// Stores `value` under `key`, replacing any partial, and notifies the
    /// key's subscribers.
    pub fn insert(&self, key: ResourceKey, value: Value) {
        let _serial = lock(&self.mutation);
        let subscribers = {
            let mut store = lock(&self.store);
            store.partials.remove(&key);
            store.entries.insert(key.clone(), Arc::new(value));
            store.subscribers_of(&key)
        };
        for subscriber in subscribers {
            subscriber.notify(&key);
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<Value>> {
        lock(&self.store).entries.get(key).cloned()
    }

    pub fn has(&self, key: &ResourceKey) -> bool {
        lock(&self.store).entries.contains_key(key)
    }

    /// Removes the value under `key` and notifies the key's subscribers.
    pub fn delete(&self, key: &ResourceKey) {
        let _serial = lock(&self.mutation);
        let subscribers = {
            let mut store = lock(&self.store);
            store.entries.remove(key);
            store.subscribers_of(key)
        };
        for subscriber in subscribers {
            subscriber.notify(key);
        }
    }

    /// Hands `value` to the key's subscribers without storing it.
    pub fn ping(&self, key: &ResourceKey, value: Value) {
        let _serial = lock(&self.mutation);
        let subscribers = lock(&self.store).subscribers_of(key);
        let value = Arc::new(value);
        for subscriber in subscribers {
            subscriber.ping(key, Arc::clone(&value));
        }
    }

    // ── Partials ──────────────────────────────────────────────────────────────

    /// Stores a provisional value and notifies the subscribers that accept
    /// partials.
    pub fn insert_partial(&self, key: ResourceKey, value: Value) {
        let _serial = lock(&self.mutation);
        let subscribers = {
            let mut store = lock(&self.store);
            store.partials.insert(
                key.clone(),
                PartialEntry {
                    value: Arc::new(value),
                    inserted_at: Instant::now(),
                },
            );
            store.subscribers_of(&key)
        };
        for subscriber in subscribers.into_iter().filter(|s| s.accepts_partials()) {
            subscriber.notify(&key);
        }
    }

    /// Returns the partial under `key` unless it has expired.
    pub fn get_partial(&self, key: &ResourceKey) -> Option<Arc<Value>> {
        let store = lock(&self.store);
        let entry = store.partials.get(key)?;
        (entry.inserted_at.elapsed() <= self.partial_timeout).then(|| Arc::clone(&entry.value))
    }

    pub fn has_partial(&self, key: &ResourceKey) -> bool {
        self.get_partial(key).is_some()
    }

    // ── Subscribers ───────────────────────────────────────────────────────────

    pub fn register(&self, key: ResourceKey, subscriber: Arc<dyn Subscriber>) {
        lock(&self.store)
            .subscribers
            .entry(key)
            .or_default()
            .insert(subscriber.id(), subscriber);
    }

    pub fn deregister(&self, key: &ResourceKey, id: SubscriberId) {
        let mut store = lock(&self.store);
        if let Some(set) = store.subscribers.get_mut(key) {
            set.remove(&id);
        }
    }

    pub fn subscriber_count(&self, key: &ResourceKey) -> usize {
        lock(&self.store)
            .subscribers
            .get(key)
            .map_or(0, HashMap::len)
    }

    // ── Maintenance ───────────────────────────────────────────────────────────

    /// Removes every value and partial.  Subscribers stay registered and are
    /// not notified.
    pub fn clear(&self) {
        let _serial = lock(&self.mutation);
        let mut store = lock(&self.store);
        store.entries.clear();
        store.partials.clear();
    }

    /// Evicts everything nobody is watching.  Returns the number of evicted
    /// values and partials.
    pub fn sweep(&self) -> usize {
        let _serial = lock(&self.mutation);
        let mut store = lock(&self.store);
        store.subscribers.retain(|_, set| !set.is_empty());

        let Store {
            entries,
            partials,
            subscribers,
        } = &mut *store;
        let before = entries.len() + partials.len();
        entries.retain(|key, _| subscribers.contains_key(key));
        partials.retain(|key, _| subscribers.contains_key(key));
        before - entries.len() - partials.len()
    }

    /// Runs [`sweep`](Self::sweep) every `interval`, starting one interval
    /// from now.  The task ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!("cache sweep evicted {evicted} entries");
                }
            }
        })
    }

    /// Drops every subscriber and every stored value.
    pub fn teardown(&self) {
        let _serial = lock(&self.mutation);
        let mut store = lock(&self.store);
        store.subscribers.clear();
        store.entries.clear();
        store.partials.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
