//! `aof://login/*`: key material and account management.
//!
//! Login and logout themselves happen over HTTP before the socket is opened;
//! the socket only ever sees an authenticated session.

use std::collections::HashMap;
use std::sync::Arc;

use aof_core::ResourceKey;
use async_trait::async_trait;
use futures_util::FutureExt;
use rmpv::Value;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{args, check_result, Handler, LoadContext, LoadError, Route, NO_ARGS};
use crate::application::cache::Cache;
use crate::application::session::{KeySource, SessionError};
use crate::domain::paths::{LOGIN, LOGIN_CLIENT_KEY, LOGIN_SECRET_KEY};
use crate::infrastructure::connection::Connection;

const SCOPE: &str = "login";

pub(super) fn register(handlers: &mut HashMap<Route, Handler>) {
    handlers.insert(Route::LoginSecretKey, |ctx, _, _| {
        async move { fetch_key(&ctx.cache, &ctx.connection, SECRET_KEY_REQUEST, LOGIN_SECRET_KEY).await }
            .boxed()
    });
    handlers.insert(Route::LoginClientKey, |ctx, _, _| {
        async move { fetch_key(&ctx.cache, &ctx.connection, CLIENT_KEY_REQUEST, LOGIN_CLIENT_KEY).await }
            .boxed()
    });
    handlers.insert(Route::LoginChangeName, |ctx, data, _| change_name(ctx, data).boxed());
    handlers.insert(Route::LoginChangePassword, |ctx, data, _| {
        change_password(ctx, data).boxed()
    });
    handlers.insert(Route::LoginDeleteAccount, |ctx, data, _| {
        delete_account(ctx, data).boxed()
    });
}

const SECRET_KEY_REQUEST: &str = "user_secret_key";
const CLIENT_KEY_REQUEST: &str = "user_client_key";

#[derive(Deserialize)]
struct ChangeNameArgs {
    name: String,
}

#[derive(Serialize)]
struct ChangeNameRequest<'a> {
    new_name: &'a str,
}

#[derive(Serialize, Deserialize)]
struct ChangePasswordArgs {
    password: String,
    new_password: String,
}

#[derive(Serialize, Deserialize)]
struct DeleteAccountArgs {
    password: String,
}

async fn fetch_key(
    cache: &Cache,
    connection: &Connection,
    request: &str,
    key: &str,
) -> Result<Value, LoadError> {
    connection.ensure_open().await?;
    let value = connection.call_value(request, NO_ARGS, None).await?;
    cache.insert(ResourceKey::new(key), value.clone());
    Ok(value)
}

async fn change_name(ctx: Arc<LoadContext>, data: Value) -> Result<Value, LoadError> {
    let ChangeNameArgs { name } = args(data)?;
    let result = ctx
        .request("user_change_name", Some(&ChangeNameRequest { new_name: &name }))
        .await?;
    check_result(SCOPE, &result)?;
    ctx.cache.insert(ResourceKey::new(LOGIN), Value::from(name));
    Ok(Value::Nil)
}

async fn change_password(ctx: Arc<LoadContext>, data: Value) -> Result<Value, LoadError> {
    let request: ChangePasswordArgs = args(data)?;
    let result = ctx.request("user_change_password", Some(&request)).await?;
    check_result(SCOPE, &result)?;
    Ok(Value::Nil)
}

async fn delete_account(ctx: Arc<LoadContext>, data: Value) -> Result<Value, LoadError> {
    let request: DeleteAccountArgs = args(data)?;
    let result = ctx.request("user_delete", Some(&request)).await?;
    check_result(SCOPE, &result)?;
    end_session(&ctx).await;
    Ok(Value::Nil)
}

/// Forgets the crypto session, drops every cached value, marks the user as
/// logged out, and closes the socket.
pub async fn end_session(ctx: &LoadContext) {
    if let Err(e) = ctx.session.forget().await {
        warn!("could not clear persisted key: {e}");
    }
    ctx.cache.clear();
    ctx.cache.insert(ResourceKey::new(LOGIN), Value::from(""));
    ctx.connection.close().await;
    info!("session ended");
}

// ── Key source ────────────────────────────────────────────────────────────────

/// [`KeySource`] that reads the login keys from the cache and falls back to
/// asking the server.
pub struct RemoteKeySource {
    cache: Arc<Cache>,
    connection: Connection,
}

impl RemoteKeySource {
    pub fn new(cache: Arc<Cache>, connection: Connection) -> Self {
        Self { cache, connection }
    }

    async fn cached_or_fetch(&self, request: &str, key: &str) -> Result<Value, SessionError> {
        if let Some(value) = self.cache.get(&ResourceKey::new(key)) {
            if !value.is_nil() {
                return Ok((*value).clone());
            }
        }
        fetch_key(&self.cache, &self.connection, request, key)
            .await
            .map_err(|e| SessionError::KeyMaterial(e.to_string()))
    }
}

#[async_trait]
impl KeySource for RemoteKeySource {
    async fn client_key(&self) -> Result<Vec<u8>, SessionError> {
        match self.cached_or_fetch(CLIENT_KEY_REQUEST, LOGIN_CLIENT_KEY).await? {
            Value::Binary(bytes) => Ok(bytes),
            other => Err(SessionError::KeyMaterial(format!(
                "client key is not binary: {other}"
            ))),
        }
    }

    async fn secret_key(&self) -> Result<String, SessionError> {
        match self.cached_or_fetch(SECRET_KEY_REQUEST, LOGIN_SECRET_KEY).await? {
            Value::String(s) => s
                .into_str()
                .ok_or_else(|| SessionError::KeyMaterial("secret key is not UTF-8".to_string())),
            Value::Nil => Err(SessionError::KeyMaterial(
                "could not obtain secret key".to_string(),
            )),
            other => Err(SessionError::KeyMaterial(format!(
                "secret key is not a string: {other}"
            ))),
        }
    }
}
