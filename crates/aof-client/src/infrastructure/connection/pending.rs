//! Reassembly table for in-flight requests.
//!
//! Each request the client sends is registered here under its id together
//! with a oneshot responder.  Response frames are applied one at a time: the
//! first frame announces the total length and carries the first chunk, later
//! continuation frames append, and the request resolves once the buffer
//! reaches the announced length.
//!
//! The table knows nothing about sockets, so every edge case (chunk
//! boundaries, overflow, out-of-order frames) is testable on its own.

use std::collections::HashMap;
use std::sync::Arc;

use aof_core::protocol::{RequestId, ServerFrame};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::RequestError;

/// Receives the accumulated prefix of a response while it streams in.
///
/// Invoked outside any lock.  Must not panic.
pub type PartialCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Completes the caller's `request` future.
pub type Responder = oneshot::Sender<Result<Vec<u8>, RequestError>>;

/// A frame that breaks the response framing rules.  The connection treats
/// every variant as a protocol failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityViolation {
    #[error("request {id}: {received} bytes received but only {declared} declared")]
    ChunkOverflow {
        id: RequestId,
        declared: usize,
        received: usize,
    },

    #[error("request {0}: continuation frame before response frame")]
    ContinuationBeforeResponse(RequestId),

    #[error("request {0}: second response frame")]
    DuplicateResponse(RequestId),
}

/// A partial prefix to hand to a request's callback once the table lock is
/// released.
pub struct PartialDelivery {
    callback: PartialCallback,
    bytes: Vec<u8>,
}

impl PartialDelivery {
    pub fn deliver(self) {
        (self.callback)(&self.bytes);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

struct PendingRequest {
    /// Announced by the response frame; `None` until it arrives.
    total_len: Option<usize>,
    buf: Vec<u8>,
    responder: Responder,
    on_partial: Option<PartialCallback>,
}

/// In-flight requests keyed by id.
#[derive(Default)]
pub struct PendingRequests {
    entries: HashMap<RequestId, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: RequestId,
        responder: Responder,
        on_partial: Option<PartialCallback>,
    ) {
        self.entries.insert(
            id,
            PendingRequest {
                total_len: None,
                buf: Vec::new(),
                responder,
                on_partial,
            },
        );
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets a request without answering it.  Used when the send itself
    /// failed and the caller already has its error.
    pub fn remove(&mut self, id: RequestId) {
        self.entries.remove(&id);
    }

    /// Applies one response-family frame.
    ///
    /// Frames for ids that are not pending are logged and ignored.  Event
    /// frames are not part of the table and are ignored too.
    ///
    /// Returns the partial prefix to deliver, if the request is still
    /// incomplete and asked for partials.
    ///
    /// # Errors
    ///
    /// Returns an [`IntegrityViolation`] when the frame cannot belong to a
    /// well-formed response.
    pub fn apply(
        &mut self,
        frame: ServerFrame<'_>,
    ) -> Result<Option<PartialDelivery>, IntegrityViolation> {
        match frame {
            ServerFrame::Response {
                id,
                total_len,
                chunk,
            } => {
                let Some(entry) = self.entries.get_mut(&id) else {
                    warn!("ignoring response for unknown request {id}");
                    return Ok(None);
                };
                if entry.total_len.is_some() {
                    return Err(IntegrityViolation::DuplicateResponse(id));
                }
                if chunk.len() > total_len {
                    return Err(IntegrityViolation::ChunkOverflow {
                        id,
                        declared: total_len,
                        received: chunk.len(),
                    });
                }
                entry.total_len = Some(total_len);
                entry.buf.reserve_exact(total_len);
                entry.buf.extend_from_slice(chunk);
                Ok(self.settle(id))
            }
            ServerFrame::Continuation { id, chunk } => {
                let Some(entry) = self.entries.get_mut(&id) else {
                    warn!("ignoring continuation for unknown request {id}");
                    return Ok(None);
                };
                let Some(total_len) = entry.total_len else {
                    return Err(IntegrityViolation::ContinuationBeforeResponse(id));
                };
                let received = entry.buf.len() + chunk.len();
                if received > total_len {
                    return Err(IntegrityViolation::ChunkOverflow {
                        id,
                        declared: total_len,
                        received,
                    });
                }
                entry.buf.extend_from_slice(chunk);
                Ok(self.settle(id))
            }
            ServerFrame::Failure { id } => {
                if !self.reject(id, RequestError::Failed) {
                    warn!("ignoring failure for unknown request {id}");
                }
                Ok(None)
            }
            ServerFrame::Event { name, .. } => {
                debug!("event {name} passed to the request table; ignoring");
                Ok(None)
            }
        }
    }

    /// Rejects one request.  Returns `false` if it was not pending.
    pub fn reject(&mut self, id: RequestId, err: RequestError) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                // the caller may have stopped waiting
                let _ = entry.responder.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Rejects every pending request with `err` and empties the table.
    /// Returns how many were rejected.
    pub fn abort_all(&mut self, err: RequestError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.responder.send(Err(err.clone()));
        }
        count
    }

    /// Resolves `id` if its buffer is complete, or prepares a partial
    /// delivery otherwise.
    fn settle(&mut self, id: RequestId) -> Option<PartialDelivery> {
        let entry = self.entries.get(&id)?;
        if Some(entry.buf.len()) == entry.total_len {
            let entry = self.entries.remove(&id)?;
            debug!("request {id} complete ({} bytes)", entry.buf.len());
            let _ = entry.responder.send(Ok(entry.buf));
            return None;
        }
        entry.on_partial.as_ref().map(|callback| PartialDelivery {
            callback: Arc::clone(callback),
            bytes: entry.buf.clone(),
        })
    }
}
