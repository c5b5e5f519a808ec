//! Resource keys: the addresses of cacheable entities.
//!
//! A key is an opaque string of the form `scheme://segment/segment/...`.  Two
//! keys name the same resource exactly when their strings are equal, so the
//! key is a plain `String` newtype with value equality and hashing.
//!
//! Keys that the loader can resolve follow the shape
//! `aof://<type>/<handler>/<path...>`:
//!
//! ```text
//! aof://sources/source/example.com/feeds/main
//!       ^^^^^^^ ^^^^^^ ^^^^^^^^^^^^^^^^^^^^^^
//!       type    handler        path
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheme of every key the loader resolves.
pub const SCHEME: &str = "aof";

const SCHEME_SEPARATOR: &str = "://";

/// Address of one cacheable entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

/// The pieces of an `scheme://type/handler/path...` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteParts<'a> {
    pub scheme: &'a str,
    pub type_id: &'a str,
    pub handler_id: &'a str,
    pub path: Vec<&'a str>,
}

impl ResourceKey {
    /// Wraps a key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns a new key with `parts` appended as `/`-separated segments.
    ///
    /// ```rust
    /// use aof_core::ResourceKey;
    ///
    /// let base = ResourceKey::new("aof://sources/source");
    /// let key = base.join(["example.com", "feeds"]);
    /// assert_eq!(key.as_str(), "aof://sources/source/example.com/feeds");
    /// ```
    pub fn join<I, S>(&self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = self.0.clone();
        for part in parts {
            key.push('/');
            key.push_str(part.as_ref());
        }
        Self(key)
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the scheme, or `None` if the key has no `://`.
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once(SCHEME_SEPARATOR).map(|(scheme, _)| scheme)
    }

    /// Splits the key into scheme, type, handler, and remaining path.
    ///
    /// Missing type or handler segments come back as empty strings, which no
    /// route matches.  Returns `None` if the key has no `://`.
    pub fn route(&self) -> Option<RouteParts<'_>> {
        let (scheme, rest) = self.0.split_once(SCHEME_SEPARATOR)?;
        let mut segments = rest.split('/');
        let type_id = segments.next().unwrap_or_default();
        let handler_id = segments.next().unwrap_or_default();
        Some(RouteParts {
            scheme,
            type_id,
            handler_id,
            path: segments.collect(),
        })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
