//! Domain types shared by the client: resource keys and source URIs.

pub mod key;
pub mod uri;

pub use key::{ResourceKey, RouteParts, SCHEME};
pub use uri::{make_uri, parse_uri};
