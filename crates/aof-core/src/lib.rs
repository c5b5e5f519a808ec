//! # aof-core
//!
//! Shared library for the AOF client containing the wire-frame codec, the
//! best-effort partial decoder, resource keys, and the key-session crypto.
//!
//! It has zero dependencies on sockets, threads, or the async runtime, so every
//! piece can be unit-tested with plain byte slices.
//!
//! # Architecture overview (for beginners)
//!
//! The AOF client keeps a local, reactive copy of data that lives on a remote
//! service.  Requests and responses travel over one long-lived WebSocket as
//! small binary *frames*; payloads inside the frames are MessagePack.
//!
//! This crate (`aof-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the socket.  Requests are tagged
//!   frames with a 32-bit id; responses may be split across several frames and
//!   reassembled by id.  The `partial` decoder turns a truncated MessagePack
//!   buffer into a best-effort preview value.
//!
//! - **`domain`** – Resource keys (`aof://type/handler/...`) that name every
//!   cacheable entity, and the `domain:///path` source URIs used by the server.
//!
//! - **`crypto`** – The password-protected secret key, the client-key
//!   persistence record, and the nonce-prefixed envelope used for encrypted
//!   user data.

pub mod crypto;
pub mod domain;
pub mod protocol;

pub use crypto::{Envelope, EnvelopeError, KeySession, Persistence, UnlockFailure, NONCE_LEN};
pub use domain::key::{ResourceKey, RouteParts};
pub use domain::uri::{make_uri, parse_uri};
pub use protocol::frame::{decode_server_frame, encode_request, FrameError, RequestId, ServerFrame};
pub use protocol::partial::partial_decode;
pub use protocol::request_id::RequestIdCounter;
