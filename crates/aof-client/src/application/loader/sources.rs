//! `aof://sources/*`: sources, their items, and the user's encrypted notes.
//!
//! Source keys carry the source URI as path segments
//! (`aof://sources/source/<domain>/<path...>`); the handlers rebuild the URI
//! with [`make_uri`].
//!
//! User data is stored on the server as `nonce || ciphertext`.  Loading
//! decrypts it through the crypto session and decodes the MessagePack map
//! inside; saving does the reverse.

use std::collections::HashMap;
use std::sync::Arc;

use aof_core::crypto::{Envelope, NONCE_LEN};
use aof_core::protocol::payload::{decode_value, encode_value};
use aof_core::{make_uri, parse_uri, partial_decode, ResourceKey};
use futures_util::FutureExt;
use rmpv::Value;
use serde::{Deserialize, Serialize};

use super::{args, check_result, map, Handler, LoadContext, LoadError, Route, NO_ARGS};
use crate::domain::paths::{
    SOURCE, SOURCES_LIST_USER, SOURCE_ITEM, SOURCE_ITEM_DATA, SOURCE_ITEM_USER_DATA,
    SOURCE_USER_DATA,
};
use crate::infrastructure::connection::PartialCallback;

const SCOPE: &str = "sources";

pub(super) fn register(handlers: &mut HashMap<Route, Handler>) {
    handlers.insert(Route::SourcesListUser, |ctx, _, _| list_user(ctx).boxed());
    handlers.insert(Route::SourcesSource, |ctx, _, path| {
        fetch(ctx, "source", SOURCE, path).boxed()
    });
    handlers.insert(Route::SourcesSourceItem, |ctx, _, path| {
        fetch(ctx, "source_item", SOURCE_ITEM, path).boxed()
    });
    handlers.insert(Route::SourcesSourceItemData, |ctx, _, path| {
        source_item_data(ctx, path).boxed()
    });
    handlers.insert(Route::SourcesSourceUserData, |ctx, _, path| {
        user_data(ctx, "source_user_data", SOURCE_USER_DATA, path).boxed()
    });
    handlers.insert(Route::SourcesSourceItemUserData, |ctx, _, path| {
        user_data(ctx, "source_item_user_data", SOURCE_ITEM_USER_DATA, path).boxed()
    });
    handlers.insert(Route::SourcesSetSourceUserData, |ctx, data, _| {
        set_user_data(ctx, data, "set_source_user_data", SOURCE_USER_DATA).boxed()
    });
    handlers.insert(Route::SourcesSetSourceItemUserData, |ctx, data, _| {
        set_user_data(ctx, data, "set_source_item_user_data", SOURCE_ITEM_USER_DATA).boxed()
    });
    handlers.insert(Route::SourcesSubscribe, |ctx, data, _| {
        simple(ctx, data, "user_subscribe_source").boxed()
    });
    handlers.insert(Route::SourcesUnsubscribe, |ctx, data, _| {
        simple(ctx, data, "user_unsubscribe_source").boxed()
    });
    handlers.insert(Route::SourcesRequest, |ctx, data, _| {
        simple(ctx, data, "user_request_source").boxed()
    });
    handlers.insert(Route::SourcesRequestItem, |ctx, data, _| {
        simple(ctx, data, "user_request_source_item").boxed()
    });
    handlers.insert(Route::SourcesDelete, |ctx, data, _| delete(ctx, data).boxed());
}

#[derive(Serialize, Deserialize)]
struct UriArgs {
    uri: String,
}

#[derive(Deserialize)]
struct SetUserDataArgs {
    uri: String,
    #[serde(default = "nil")]
    data: Value,
}

fn nil() -> Value {
    Value::Nil
}

fn uri_of(path: &[String]) -> Result<String, LoadError> {
    make_uri(path).ok_or_else(|| LoadError::InvalidArguments("missing source uri".to_string()))
}

async fn list_user(ctx: Arc<LoadContext>) -> Result<Value, LoadError> {
    let list = ctx.request("user_sources", NO_ARGS).await?;
    ctx.cache
        .insert(ResourceKey::new(SOURCES_LIST_USER), list.clone());
    Ok(list)
}

async fn fetch(
    ctx: Arc<LoadContext>,
    request: &str,
    base: &str,
    path: Vec<String>,
) -> Result<Value, LoadError> {
    let uri = uri_of(&path)?;
    let value = ctx.request(request, Some(&UriArgs { uri })).await?;
    ctx.cache
        .insert(ResourceKey::new(base).join(&path), value.clone());
    Ok(value)
}

async fn source_item_data(ctx: Arc<LoadContext>, path: Vec<String>) -> Result<Value, LoadError> {
    let uri = uri_of(&path)?;
    let key = ResourceKey::new(SOURCE_ITEM_DATA).join(&path);

    let cache = Arc::clone(&ctx.cache);
    let partial_key = key.clone();
    let on_partial: PartialCallback = Arc::new(move |prefix: &[u8]| {
        if let Some(preview) = partial_decode(prefix) {
            cache.insert_partial(partial_key.clone(), preview);
        }
    });

    let value = ctx
        .request_streaming("source_item_data", Some(&UriArgs { uri }), Some(on_partial))
        .await?;
    ctx.cache.insert(key, value.clone());
    Ok(value)
}

async fn user_data(
    ctx: Arc<LoadContext>,
    request: &str,
    base: &str,
    path: Vec<String>,
) -> Result<Value, LoadError> {
    let uri = uri_of(&path)?;
    let response = ctx.request(request, Some(&UriArgs { uri })).await?;
    let stored = match response {
        Value::Binary(bytes) => bytes,
        Value::Nil => Vec::new(),
        other => {
            return Err(LoadError::UnexpectedResponse(format!(
                "user data is not binary: {other}"
            )))
        }
    };

    let plain = if stored.len() > NONCE_LEN {
        ctx.session.decrypt(&Envelope::split(&stored)?).await?
    } else {
        stored
    };
    let decoded = if plain.is_empty() {
        Value::Map(Vec::new())
    } else {
        decode_value(&plain).map_err(|e| LoadError::InvalidUserData(e.to_string()))?
    };
    if !decoded.is_map() {
        return Err(LoadError::InvalidUserData(decoded.to_string()));
    }

    ctx.cache
        .insert(ResourceKey::new(base).join(&path), decoded.clone());
    Ok(decoded)
}

async fn set_user_data(
    ctx: Arc<LoadContext>,
    data: Value,
    request: &str,
    base: &str,
) -> Result<Value, LoadError> {
    let SetUserDataArgs { uri, data } = args(data)?;
    let plain = if data.is_nil() {
        Vec::new()
    } else {
        encode_value(&data).map_err(|e| LoadError::InvalidArguments(e.to_string()))?
    };
    let envelope = ctx.session.encrypt(plain).await?;

    let body = map([
        ("uri", Value::from(uri.as_str())),
        ("data", Value::Binary(envelope.to_bytes())),
    ]);
    let result = ctx.request(request, Some(&body)).await?;
    check_result(SCOPE, &result)?;

    ctx.cache
        .insert(ResourceKey::new(base).join(parse_uri(&uri)), data);
    Ok(Value::Nil)
}

async fn simple(ctx: Arc<LoadContext>, data: Value, request: &str) -> Result<Value, LoadError> {
    let uri: UriArgs = args(data)?;
    let result = ctx.request(request, Some(&uri)).await?;
    check_result(SCOPE, &result)?;
    Ok(Value::Nil)
}

async fn delete(ctx: Arc<LoadContext>, data: Value) -> Result<Value, LoadError> {
    let uri: UriArgs = args(data)?;
    let result = ctx.request("user_delete_source", Some(&uri)).await?;
    check_result(SCOPE, &result)?;
    ctx.cache
        .delete(&ResourceKey::new(SOURCE).join(parse_uri(&uri.uri)));
    Ok(Value::Nil)
}
