//! Thread-safe request id allocation.
//!
//! # What is a request id? (for beginners)
//!
//! Many requests can be in flight on the same socket at once, and the server is
//! free to answer them in any order.  Every request frame therefore carries a
//! 32-bit id, and every response frame repeats it so the client can hand the
//! bytes to the right waiter.
//!
//! Ids only need to be unique among the requests that are *still pending*.
//! The counter walks the whole 32-bit space before it wraps, so a collision
//! would need four billion requests outstanding at the same time.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU32` internally, so two tasks calling
//! [`RequestIdCounter::next`] at the same moment never receive the same id.

use std::sync::atomic::{AtomicU32, Ordering};

use super::frame::RequestId;

/// A thread-safe, monotonically increasing request id source.
///
/// The first id handed out is 1.  The counter wraps from `u32::MAX` to 0
/// without panicking.
///
/// # Examples
///
/// ```rust
/// use aof_core::protocol::RequestIdCounter;
///
/// let ids = RequestIdCounter::new();
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// ```
#[derive(Debug, Default)]
pub struct RequestIdCounter {
    last: AtomicU32,
}

impl RequestIdCounter {
    /// Creates a new counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            last: AtomicU32::new(0),
        }
    }

    /// Returns the next request id.
    ///
    /// `Ordering::Relaxed` is sufficient: ids only need to be distinct, they do
    /// not synchronise any other memory.
    pub fn next(&self) -> RequestId {
        // `fetch_add` wraps on overflow and returns the previous value.
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Returns the most recently issued id without advancing.
    pub fn current(&self) -> RequestId {
        self.last.load(Ordering::Relaxed)
    }
}
