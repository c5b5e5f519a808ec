//! The loader: turns resource keys into server requests.
//!
//! # Routing (for beginners)
//!
//! A loadable key has the shape `aof://<type>/<handler>/<path...>`.  The
//! `(type, handler)` pair selects a [`Route`]; the remaining path segments are
//! handed to the route's handler together with the caller's arguments:
//!
//! ```text
//! aof://sources/source/example.com/feeds/main
//!       ───────┬──────  ──────────┬──────────
//!   Route::SourcesSource    path = ["example.com", "feeds", "main"]
//! ```
//!
//! Handlers live in one submodule per type and register themselves in
//! [`Loader::new`].  Most of them send one request, store the answer in the
//! cache, and return it.

pub mod connection;
pub mod domains;
pub mod login;
pub mod sources;

use std::collections::HashMap;
use std::sync::Arc;

use aof_core::crypto::EnvelopeError;
use aof_core::domain::key::SCHEME;
use aof_core::ResourceKey;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::cache::Cache;
use super::session::{SessionCrypto, SessionError};
use super::view::ResourceLoader;
use crate::domain::paths;
use crate::infrastructure::connection::{Connection, ConnectionError, PartialCallback, RequestError};

pub use login::RemoteKeySource;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a load failed.  `Clone` because a view keeps its last error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("not an aof:// key: {0}")]
    NotAof(String),

    #[error("no handler for {0}")]
    NoHandler(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The server answered `{success: false, error}`.
    #[error("{scope}.{code}")]
    Rejected { scope: &'static str, code: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("user data is not an object: {0}")]
    InvalidUserData(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

// ── Routes ────────────────────────────────────────────────────────────────────

/// Declares the [`Route`] enum.  Each variant is bound to its well-known key;
/// the `(type, handler)` segments are read from that key.
macro_rules! routes {
    ($( $variant:ident => $key:ident ),* $(,)?) => {
        /// A `(type, handler)` pair with a registered handler.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Route {
            $( $variant ),*
        }

        impl Route {
            pub const ALL: &'static [Route] = &[$( Route::$variant ),*];

            /// The key that addresses this route, without any path.
            pub fn key(self) -> &'static str {
                match self {
                    $( Route::$variant => paths::$key, )*
                }
            }
        }
    };
}

routes! {
    ConnectionOpen => CONNECTION_OPEN,
    ConnectionClose => CONNECTION_CLOSE,

    LoginSecretKey => LOGIN_SECRET_KEY,
    LoginClientKey => LOGIN_CLIENT_KEY,
    LoginChangeName => LOGIN_CHANGE_NAME,
    LoginChangePassword => LOGIN_CHANGE_PASSWORD,
    LoginDeleteAccount => LOGIN_DELETE_ACCOUNT,

    DomainsListUser => DOMAINS_LIST_USER,
    DomainsListPublic => DOMAINS_LIST_PUBLIC,
    DomainsDomain => DOMAIN,
    DomainsDomainScript => DOMAIN_SCRIPT,
    DomainsCreate => DOMAIN_CREATE,
    DomainsUpdate => DOMAIN_UPDATE,
    DomainsDelete => DOMAIN_DELETE,
    DomainsSubscribe => DOMAIN_SUBSCRIBE,
    DomainsUnsubscribe => DOMAIN_UNSUBSCRIBE,

    SourcesListUser => SOURCES_LIST_USER,
    SourcesSource => SOURCE,
    SourcesSourceItem => SOURCE_ITEM,
    SourcesSourceItemData => SOURCE_ITEM_DATA,
    SourcesSourceUserData => SOURCE_USER_DATA,
    SourcesSourceItemUserData => SOURCE_ITEM_USER_DATA,
    SourcesSetSourceUserData => SOURCE_SET_USER_DATA,
    SourcesSetSourceItemUserData => SOURCE_ITEM_SET_USER_DATA,
    SourcesSubscribe => SOURCE_SUBSCRIBE,
    SourcesUnsubscribe => SOURCE_UNSUBSCRIBE,
    SourcesDelete => SOURCE_DELETE,
    SourcesRequest => SOURCE_REQUEST,
    SourcesRequestItem => SOURCE_ITEM_REQUEST,
}

impl Route {
    /// The `(type, handler)` pair of [`key`](Self::key).
    pub fn segments(self) -> (&'static str, &'static str) {
        let path = self.key().split_once("://").map_or("", |(_, path)| path);
        path.split_once('/').unwrap_or((path, ""))
    }

    pub fn from_segments(type_id: &str, handler_id: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|route| route.segments() == (type_id, handler_id))
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything a handler may touch.
pub struct LoadContext {
    pub cache: Arc<Cache>,
    pub connection: Connection,
    pub session: SessionCrypto,
}

impl LoadContext {
    /// Opens the socket if needed, sends `name`, and decodes the answer.
    pub(crate) async fn request<A>(&self, name: &str, args: Option<&A>) -> Result<Value, LoadError>
    where
        A: Serialize + Sync + ?Sized,
    {
        self.request_streaming(name, args, None).await
    }

    /// Like [`request`](Self::request) with a callback for partial responses.
    pub(crate) async fn request_streaming<A>(
        &self,
        name: &str,
        args: Option<&A>,
        on_partial: Option<PartialCallback>,
    ) -> Result<Value, LoadError>
    where
        A: Serialize + Sync + ?Sized,
    {
        self.connection.ensure_open().await?;
        Ok(self.connection.call_value(name, args, on_partial).await?)
    }
}

/// Request arguments for calls without any.
pub(crate) const NO_ARGS: Option<&()> = None;

/// A handler's future.
pub type HandlerFuture = BoxFuture<'static, Result<Value, LoadError>>;

/// A route handler: context, caller arguments, remaining path segments.
pub type Handler = fn(Arc<LoadContext>, Value, Vec<String>) -> HandlerFuture;

// ── Loader ────────────────────────────────────────────────────────────────────

pub struct Loader {
    context: Arc<LoadContext>,
    handlers: HashMap<Route, Handler>,
}

impl Loader {
    pub fn new(context: LoadContext) -> Self {
        let mut handlers = HashMap::new();
        connection::register(&mut handlers);
        login::register(&mut handlers);
        domains::register(&mut handlers);
        sources::register(&mut handlers);
        Self {
            context: Arc::new(context),
            handlers,
        }
    }

    pub fn context(&self) -> &Arc<LoadContext> {
        &self.context
    }

    /// Runs the handler for `key` with the caller's arguments.
    ///
    /// # Errors
    ///
    /// [`LoadError::NotAof`] / [`LoadError::NoHandler`] when the key does not
    /// resolve, otherwise whatever the handler returns.
    pub async fn load(&self, key: &ResourceKey, data: Value) -> Result<Value, LoadError> {
        let (route, path) = resolve(key)?;
        let handler = self
            .handlers
            .get(&route)
            .ok_or_else(|| LoadError::NoHandler(key.to_string()))?;
        debug!("load {key}");
        handler(Arc::clone(&self.context), data, path).await
    }

    pub fn can_load(&self, key: &ResourceKey) -> bool {
        resolve(key).is_ok_and(|(route, _)| self.handlers.contains_key(&route))
    }
}

#[async_trait]
impl ResourceLoader for Loader {
    async fn load(&self, key: &ResourceKey, data: Value) -> Result<Value, LoadError> {
        Loader::load(self, key, data).await
    }

    fn can_load(&self, key: &ResourceKey) -> bool {
        Loader::can_load(self, key)
    }
}

fn resolve(key: &ResourceKey) -> Result<(Route, Vec<String>), LoadError> {
    let parts = key
        .route()
        .filter(|parts| parts.scheme == SCHEME)
        .ok_or_else(|| LoadError::NotAof(key.to_string()))?;
    let route = Route::from_segments(parts.type_id, parts.handler_id)
        .ok_or_else(|| LoadError::NoHandler(format!("{}/{}", parts.type_id, parts.handler_id)))?;
    Ok((route, parts.path.into_iter().map(str::to_owned).collect()))
}

// ── Handler helpers ───────────────────────────────────────────────────────────

/// Deserializes handler arguments.
pub(crate) fn args<T: DeserializeOwned>(data: Value) -> Result<T, LoadError> {
    rmpv::ext::from_value(data).map_err(|e| LoadError::InvalidArguments(e.to_string()))
}

/// Looks up `name` in a map value.
pub(crate) fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(name))
        .map(|(_, v)| v)
}

/// Checks a `{success, error}` result.
pub(crate) fn check_result(scope: &'static str, result: &Value) -> Result<(), LoadError> {
    if field(result, "success").and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }
    let code = match field(result, "error") {
        Some(Value::String(s)) => s.as_str().unwrap_or_default().to_string(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    };
    Err(LoadError::Rejected { scope, code })
}

/// Builds a string-keyed map value.
pub(crate) fn map<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}
