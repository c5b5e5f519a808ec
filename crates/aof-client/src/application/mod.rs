//! Application layer: everything between the socket and the caller.
//!
//! # What lives here?
//!
//! - **`cache`** – Resource values keyed by [`ResourceKey`](aof_core::ResourceKey),
//!   the provisional partial values streamed in before a response completes,
//!   and the subscribers notified when either changes.
//!
//! - **`view`** – A live handle on one key.  A view registers itself with the
//!   cache, triggers a load when the key is missing, and re-emits changes as
//!   [`ViewEvent`](view::ViewEvent)s.
//!
//! - **`loader`** – Routes `aof://<type>/<handler>/...` keys to handlers that
//!   talk to the server and fill the cache.
//!
//! - **`session`** – Unlocks the user's secret key once and encrypts or
//!   decrypts user data with it.
//!
//! - **`events`** – Applies server push events to the cache.
//!
//! - **`client`** – Builds all of the above from a [`ClientConfig`](crate::ClientConfig)
//!   and runs the background tasks.

pub mod cache;
pub mod client;
pub mod events;
pub mod loader;
pub mod session;
pub mod view;
