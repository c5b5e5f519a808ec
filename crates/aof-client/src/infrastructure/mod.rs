//! Infrastructure layer: the socket, key persistence, and the crypto thread.
//!
//! Everything here touches the outside world (network, file system, OS
//! threads).  The application layer drives these through plain handles.

pub mod connection;
pub mod crypto_worker;
pub mod key_storage;
