//! Applies server push events to the cache.
//!
//! Fetch progress is published under `sources/source_fetch/<uri parts>` (and
//! the `source_item_fetch` equivalent) while a fetch runs.  When it ends the
//! result is pinged to watchers, the progress entry is removed, and a
//! successful fetch invalidates the fetched data so open views reload it.

use aof_core::{parse_uri, ResourceKey};
use rmpv::Value;
use tracing::{debug, warn};

use super::cache::Cache;
use super::loader::{field, map};
use crate::domain::paths::{
    SOURCE, SOURCES_LIST_USER, SOURCE_FETCH, SOURCE_ITEM, SOURCE_ITEM_DATA, SOURCE_ITEM_FETCH,
};

pub const SOURCE_FETCH_DID_BEGIN: &str = "source_fetch_did_begin";
pub const SOURCE_FETCH_DID_END: &str = "source_fetch_did_end";
pub const SOURCE_ITEM_FETCH_DID_BEGIN: &str = "source_item_fetch_did_begin";
pub const SOURCE_ITEM_FETCH_DID_END: &str = "source_item_fetch_did_end";
pub const USER_DID_SUBSCRIBE_SOURCE: &str = "user_did_subscribe_source";
pub const USER_DID_UNSUBSCRIBE_SOURCE: &str = "user_did_unsubscribe_source";

/// Applies one event.  Unknown events and malformed payloads are logged and
/// ignored.
pub fn handle_event(cache: &Cache, name: &str, data: &Value) {
    debug!("event {name}");
    match name {
        SOURCE_FETCH_DID_BEGIN => fetch_did_begin(cache, SOURCE_FETCH, "source", data),
        SOURCE_ITEM_FETCH_DID_BEGIN => {
            fetch_did_begin(cache, SOURCE_ITEM_FETCH, "source_item", data)
        }
        SOURCE_FETCH_DID_END => {
            fetch_did_end(cache, SOURCE_FETCH, "source", data, &[SOURCE]);
        }
        SOURCE_ITEM_FETCH_DID_END => fetch_did_end(
            cache,
            SOURCE_ITEM_FETCH,
            "source_item",
            data,
            &[SOURCE_ITEM, SOURCE_ITEM_DATA],
        ),
        USER_DID_SUBSCRIBE_SOURCE => update_source_list(cache, data, true),
        USER_DID_UNSUBSCRIBE_SOURCE => update_source_list(cache, data, false),
        _ => warn!("ignoring unknown event type {name}: {data}"),
    }
}

fn uri_field<'a>(data: &'a Value, name: &str) -> Option<&'a str> {
    let uri = field(data, name).and_then(Value::as_str);
    if uri.is_none() {
        warn!("event payload has no {name} uri: {data}");
    }
    uri
}

fn fetch_did_begin(cache: &Cache, progress_base: &str, uri_name: &str, data: &Value) {
    let Some(uri) = uri_field(data, uri_name) else {
        return;
    };
    cache.insert(
        ResourceKey::new(progress_base).join(parse_uri(uri)),
        map([("loading", Value::from(true))]),
    );
}

fn fetch_did_end(
    cache: &Cache,
    progress_base: &str,
    uri_name: &str,
    data: &Value,
    invalidate: &[&str],
) {
    let Some(uri) = uri_field(data, uri_name) else {
        return;
    };
    let parts = parse_uri(uri);
    let progress = ResourceKey::new(progress_base).join(&parts);
    cache.ping(
        &progress,
        map([("loading", Value::from(false)), ("result", data.clone())]),
    );
    cache.delete(&progress);

    if field(data, "success").and_then(Value::as_bool) == Some(true) {
        for base in invalidate {
            cache.delete(&ResourceKey::new(*base).join(&parts));
        }
    }
}

fn update_source_list(cache: &Cache, data: &Value, subscribed: bool) {
    let Some(uri) = uri_field(data, "source") else {
        return;
    };
    let key = ResourceKey::new(SOURCES_LIST_USER);
    let Some(current) = cache.get(&key) else {
        return;
    };
    let Some(list) = current.as_array() else {
        warn!("{SOURCES_LIST_USER} is not a list");
        return;
    };

    let mut list = list.clone();
    if subscribed {
        list.push(Value::from(uri));
    } else if let Some(index) = list.iter().position(|v| v.as_str() == Some(uri)) {
        list.remove(index);
    }
    cache.insert(key, Value::Array(list));
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::application::cache::{Subscriber, SubscriberId};

    /// Records notifications and pings for one key.
    #[derive(Default)]
    struct RecordingSubscriber {
        id: SubscriberId,
        notified: Mutex<u32>,
        pinged: Mutex<Vec<Value>>,
    }

    impl Subscriber for RecordingSubscriber {
        fn id(&self) -> SubscriberId {
            self.id
        }
        fn notify(&self, _key: &ResourceKey) {
            *self.notified.lock().unwrap() += 1;
        }
        fn ping(&self, _key: &ResourceKey, value: Arc<Value>) {
            self.pinged.lock().unwrap().push((*value).clone());
        }
    }

    fn cache() -> Cache {
        Cache::new(Duration::from_secs(10))
    }

    fn source_event(success: bool) -> Value {
        map([
            ("source", Value::from("example.com:///feeds/main")),
            ("success", Value::from(success)),
        ])
    }

    #[test]
    fn test_fetch_begin_publishes_progress() {
        let cache = cache();

        handle_event(&cache, SOURCE_FETCH_DID_BEGIN, &source_event(true));

        let key = ResourceKey::new("aof://sources/source_fetch/example.com/feeds/main");
        assert_eq!(
            cache.get(&key).as_deref(),
            Some(&map([("loading", Value::from(true))]))
        );
    }

    #[test]
    fn test_fetch_end_pings_then_invalidates_source() {
        // Arrange
        let cache = cache();
        let progress = ResourceKey::new("aof://sources/source_fetch/example.com/feeds/main");
        let source = ResourceKey::new("aof://sources/source/example.com/feeds/main");
        let watcher = Arc::new(RecordingSubscriber::default());
        cache.register(progress.clone(), watcher.clone());
        handle_event(&cache, SOURCE_FETCH_DID_BEGIN, &source_event(true));
        cache.insert(source.clone(), Value::from("stale"));

        // Act
        handle_event(&cache, SOURCE_FETCH_DID_END, &source_event(true));

        // Assert
        let pinged = watcher.pinged.lock().unwrap().clone();
        assert_eq!(pinged.len(), 1);
        assert_eq!(field(&pinged[0], "loading"), Some(&Value::from(false)));
        assert_eq!(field(&pinged[0], "result"), Some(&source_event(true)));
        assert!(!cache.has(&progress));
        assert!(!cache.has(&source));
    }

    #[test]
    fn test_failed_fetch_keeps_source() {
        let cache = cache();
        let source = ResourceKey::new("aof://sources/source/example.com/feeds/main");
        cache.insert(source.clone(), Value::from("current"));

        handle_event(&cache, SOURCE_FETCH_DID_END, &source_event(false));

        assert!(cache.has(&source));
    }

    #[test]
    fn test_item_fetch_end_invalidates_item_and_data() {
        let cache = cache();
        let item = ResourceKey::new("aof://sources/source_item/d/a/1");
        let data = ResourceKey::new("aof://sources/source_item_data/d/a/1");
        cache.insert(item.clone(), Value::Nil);
        cache.insert(data.clone(), Value::Nil);
        let event = map([
            ("source_item", Value::from("d:///a/1")),
            ("success", Value::from(true)),
        ]);

        handle_event(&cache, SOURCE_ITEM_FETCH_DID_END, &event);

        assert!(!cache.has(&item));
        assert!(!cache.has(&data));
    }

    #[test]
    fn test_subscription_events_edit_cached_list() {
        // Arrange
        let cache = cache();
        let key = ResourceKey::new(SOURCES_LIST_USER);
        cache.insert(key.clone(), Value::Array(vec![Value::from("a:///x")]));

        // Act
        handle_event(&cache, USER_DID_SUBSCRIBE_SOURCE, &map([("source", Value::from("b:///y"))]));
        handle_event(&cache, USER_DID_UNSUBSCRIBE_SOURCE, &map([("source", Value::from("a:///x"))]));

        // Assert
        assert_eq!(
            cache.get(&key).as_deref(),
            Some(&Value::Array(vec![Value::from("b:///y")]))
        );
    }

    #[test]
    fn test_subscription_event_without_cached_list_is_ignored() {
        let cache = cache();

        handle_event(&cache, USER_DID_SUBSCRIBE_SOURCE, &map([("source", Value::from("b:///y"))]));

        assert!(!cache.has(&ResourceKey::new(SOURCES_LIST_USER)));
    }

    #[test]
    fn test_unknown_event_changes_nothing() {
        let cache = cache();
        let watcher = Arc::new(RecordingSubscriber::default());
        cache.register(ResourceKey::new(SOURCES_LIST_USER), watcher.clone());

        handle_event(&cache, "server_restarted", &Value::Nil);

        assert_eq!(*watcher.notified.lock().unwrap(), 0);
    }
}
