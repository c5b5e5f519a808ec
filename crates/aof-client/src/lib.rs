//! # aof-client
//!
//! Reactive client for the AOF service: a local cache of remote resources kept
//! in sync over one WebSocket, with user data encrypted under a
//! password-protected secret key.
//!
//! # Architecture overview (for beginners)
//!
//! A caller asks for a *resource key* such as
//! `aof://sources/source/example.com/feeds/main`.  If the cache already holds
//! the value it is returned right away.  Otherwise the *loader* routes the key
//! to a handler, which sends a request over the *connection*, stores the
//! answer in the *cache*, and every *view* watching that key is notified.
//!
//! ```text
//!   View ──register──▶ Cache ◀──insert── Loader handler ──request──▶ Connection
//!     ▲                  │                    │                          │
//!     └────notify────────┘                    └──encrypt/decrypt──▶ Session
//!                                                                        │
//!                                                              crypto worker thread
//! ```
//!
//! ## Layers
//!
//! - **`domain`** – Configuration schema and the well-known resource keys.
//!
//! - **`application`** – The cache, views, the loader and its handlers, the
//!   crypto session, server-event handling, and the [`Client`] service that
//!   wires them together.
//!
//! - **`infrastructure`** – The WebSocket connection with its response
//!   reassembly table, key storage on disk, and the dedicated crypto thread.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::cache::{Cache, Subscriber, SubscriberId};
pub use application::client::Client;
pub use application::loader::{LoadError, Loader};
pub use application::session::{PasswordPrompt, PromptResponse, SessionCrypto, SessionError};
pub use application::view::{lazy_load, View, ViewEvent, ViewOptions};
pub use domain::ClientConfig;
