//! Domain layer for the client: configuration schema and the well-known
//! resource keys.
//!
//! Nothing in this layer performs network I/O or touches the cache.

pub mod config;
pub mod paths;

pub use config::{CacheConfig, ClientConfig, ConfigError, ServerConfig, SessionConfig};
