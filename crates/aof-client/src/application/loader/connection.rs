//! `aof://connection/*`: open and close the socket on request.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use rmpv::Value;

use super::{Handler, LoadContext, LoadError, Route};

pub(super) fn register(handlers: &mut HashMap<Route, Handler>) {
    handlers.insert(Route::ConnectionOpen, |ctx, _, _| open(ctx).boxed());
    handlers.insert(Route::ConnectionClose, |ctx, _, _| close(ctx).boxed());
}

async fn open(ctx: Arc<LoadContext>) -> Result<Value, LoadError> {
    ctx.connection.ensure_open().await?;
    Ok(Value::Nil)
}

async fn close(ctx: Arc<LoadContext>) -> Result<Value, LoadError> {
    ctx.connection.close().await;
    Ok(Value::Nil)
}
