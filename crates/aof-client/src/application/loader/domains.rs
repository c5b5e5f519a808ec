//! `aof://domains/*`: script domains and their subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use aof_core::ResourceKey;
use futures_util::FutureExt;
use rmpv::Value;
use serde::{Deserialize, Serialize};

use super::{args, check_result, field, map, Handler, LoadContext, LoadError, Route, NO_ARGS};
use crate::domain::paths::{DOMAIN, DOMAINS_LIST_PUBLIC, DOMAINS_LIST_USER, DOMAIN_SCRIPT};

const SCOPE: &str = "domains";

pub(super) fn register(handlers: &mut HashMap<Route, Handler>) {
    handlers.insert(Route::DomainsListUser, |ctx, _, _| {
        list(ctx, "user_domains", DOMAINS_LIST_USER).boxed()
    });
    handlers.insert(Route::DomainsListPublic, |ctx, _, _| {
        list(ctx, "public_domains", DOMAINS_LIST_PUBLIC).boxed()
    });
    handlers.insert(Route::DomainsDomain, |ctx, _, path| domain(ctx, path).boxed());
    handlers.insert(Route::DomainsDomainScript, |ctx, _, path| {
        domain_script(ctx, path).boxed()
    });
    handlers.insert(Route::DomainsCreate, |ctx, data, _| create(ctx, data).boxed());
    handlers.insert(Route::DomainsUpdate, |ctx, data, _| update(ctx, data).boxed());
    handlers.insert(Route::DomainsDelete, |ctx, data, _| delete(ctx, data).boxed());
    handlers.insert(Route::DomainsSubscribe, |ctx, data, _| {
        membership(ctx, data, "user_subscribe_domain").boxed()
    });
    handlers.insert(Route::DomainsUnsubscribe, |ctx, data, _| {
        membership(ctx, data, "user_unsubscribe_domain").boxed()
    });
}

#[derive(Serialize, Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Serialize, Deserialize)]
struct CreateArgs {
    abbrev: String,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct UpdateArgs {
    id: String,
    abbrev: String,
    name: String,
    description: String,
    is_public: bool,
    script: String,
}

/// The domain id is the first path segment.
fn domain_id(path: &[String]) -> Result<&str, LoadError> {
    path.first()
        .map(String::as_str)
        .ok_or_else(|| LoadError::InvalidArguments("missing domain id".to_string()))
}

async fn list(ctx: Arc<LoadContext>, request: &str, key: &str) -> Result<Value, LoadError> {
    let list = ctx.request(request, NO_ARGS).await?;
    ctx.cache.insert(ResourceKey::new(key), list.clone());
    Ok(list)
}

async fn domain(ctx: Arc<LoadContext>, path: Vec<String>) -> Result<Value, LoadError> {
    let id = domain_id(&path)?;
    let domain = ctx.request("domain", Some(&IdArgs { id: id.to_string() })).await?;
    if domain.is_nil() {
        return Err(LoadError::NotFound(format!("domain {id}")));
    }
    ctx.cache
        .insert(ResourceKey::new(DOMAIN).join([id]), domain.clone());
    Ok(domain)
}

async fn domain_script(ctx: Arc<LoadContext>, path: Vec<String>) -> Result<Value, LoadError> {
    let id = domain_id(&path)?;
    let result = ctx
        .request("domain_script", Some(&IdArgs { id: id.to_string() }))
        .await?;
    check_result(SCOPE, &result)?;
    let script = field(&result, "script").cloned().unwrap_or(Value::Nil);
    ctx.cache
        .insert(ResourceKey::new(DOMAIN_SCRIPT).join([id]), script.clone());
    Ok(script)
}

async fn create(ctx: Arc<LoadContext>, data: Value) -> Result<Value, LoadError> {
    let request: CreateArgs = args(data)?;
    let result = ctx.request("user_create_domain", Some(&request)).await?;
    check_result(SCOPE, &result)?;
    ctx.cache.delete(&ResourceKey::new(DOMAINS_LIST_USER));
    Ok(field(&result, "id").cloned().unwrap_or(Value::Nil))
}

async fn update(ctx: Arc<LoadContext>, data: Value) -> Result<Value, LoadError> {
    let request: UpdateArgs = args(data)?;
    let result = ctx.request("user_update_domain", Some(&request)).await?;
    check_result(SCOPE, &result)?;

    let UpdateArgs {
        id,
        abbrev,
        name,
        description,
        is_public,
        script,
    } = request;
    ctx.cache.insert(
        ResourceKey::new(DOMAIN).join([&id]),
        map([
            ("abbrev", Value::from(abbrev)),
            ("name", Value::from(name)),
            ("description", Value::from(description)),
            ("is_public", Value::from(is_public)),
            ("editable", Value::from(true)),
        ]),
    );
    ctx.cache
        .insert(ResourceKey::new(DOMAIN_SCRIPT).join([&id]), Value::from(script));
    ctx.cache.delete(&ResourceKey::new(DOMAINS_LIST_PUBLIC));
    Ok(Value::Nil)
}

async fn delete(ctx: Arc<LoadContext>, data: Value) -> Result<Value, LoadError> {
    let request: IdArgs = args(data)?;
    let result = ctx.request("user_delete_domain", Some(&request)).await?;
    check_result(SCOPE, &result)?;
    ctx.cache.delete(&ResourceKey::new(DOMAIN).join([&request.id]));
    ctx.cache
        .delete(&ResourceKey::new(DOMAIN_SCRIPT).join([&request.id]));
    ctx.cache.delete(&ResourceKey::new(DOMAINS_LIST_USER));
    Ok(Value::Nil)
}

async fn membership(ctx: Arc<LoadContext>, data: Value, name: &str) -> Result<Value, LoadError> {
    let request: IdArgs = args(data)?;
    let result = ctx.request(name, Some(&request)).await?;
    check_result(SCOPE, &result)?;
    ctx.cache.delete(&ResourceKey::new(DOMAINS_LIST_USER));
    Ok(Value::Nil)
}
