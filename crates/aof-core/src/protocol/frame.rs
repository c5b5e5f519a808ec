//! Binary codec for the frames exchanged over the AOF session socket.
//!
//! Wire format (all multi-byte integers are big-endian):
//! ```text
//! request               [0xC0][id:4][name_len:1][name:N][payload:*]
//! response              [0xC8][id:4][total_len:4][chunk:*]
//! response-continuation [0xC9][id:4][chunk:*]
//! response-failure      [0xCC][id:4]
//! event                 [0xB8][name_len:1][name:N][payload:*]
//! ```
//!
//! One WebSocket binary message carries exactly one frame, so a frame's
//! trailing field (payload or chunk) simply runs to the end of the message.
//!
//! # Chunked responses (for beginners)
//!
//! A response larger than one frame is sent as a `response` frame announcing
//! the *total* length plus the first chunk, followed by as many
//! `response-continuation` frames as needed.  The client appends each chunk to
//! a buffer keyed by request id until the buffer reaches the announced length.
//! Because the announced length is attacker-controlled, it is checked against
//! [`MAX_RESPONSE_LEN`] *before* anything is allocated.

use thiserror::Error;

/// Tag byte of a client→server request frame.
pub const TAG_REQUEST: u8 = 0xC0;
/// Tag byte of the first (or only) frame of a response.
pub const TAG_RESPONSE: u8 = 0xC8;
/// Tag byte of every later frame of a chunked response.
pub const TAG_RESPONSE_CONTINUATION: u8 = 0xC9;
/// Tag byte of a failed call.
pub const TAG_RESPONSE_FAILURE: u8 = 0xCC;
/// Tag byte of a server push event.
pub const TAG_EVENT: u8 = 0xB8;

/// Largest chunk a server places in a single frame.
pub const MAX_CHUNK_LEN: usize = 16_384;

/// Hard ceiling on a declared response length.  Anything above it is rejected
/// before a buffer is allocated.
pub const MAX_RESPONSE_LEN: usize = 1_048_576;

/// Longest request or event name that fits the 1-byte length prefix.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Identifier correlating a request with its response frames.
pub type RequestId = u32;

/// Errors that can occur while encoding or decoding a frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The message contained no bytes at all.
    #[error("empty frame")]
    Empty,

    /// The first byte is not a known frame tag.
    #[error("unknown frame tag: 0x{0:02X}")]
    UnknownTag(u8),

    /// A fixed-width or length-prefixed field runs past the end of the frame.
    #[error("truncated frame: need at least {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// A request or event name is not valid UTF-8.
    #[error("frame name is not valid UTF-8")]
    InvalidName,

    /// A name is too long for the 1-byte length prefix.
    #[error("name of {0} bytes exceeds the 255-byte limit")]
    NameTooLong(usize),

    /// A response announced more bytes than the client is willing to allocate.
    #[error("response {id} declares {declared} bytes, limit is {max}")]
    ResponseTooLarge {
        id: RequestId,
        declared: usize,
        max: usize,
    },
}

/// A decoded server→client frame borrowing its variable-length parts from the
/// input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFrame<'a> {
    /// First frame of a response; `chunk` may already hold everything.
    Response {
        id: RequestId,
        total_len: usize,
        chunk: &'a [u8],
    },
    /// A later chunk of a response that did not fit in one frame.
    Continuation { id: RequestId, chunk: &'a [u8] },
    /// The call failed.  The protocol carries no reason on this channel.
    Failure { id: RequestId },
    /// A server push event with a MessagePack payload.
    Event { name: &'a str, payload: &'a [u8] },
}

/// A decoded client→server request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame<'a> {
    pub id: RequestId,
    pub name: &'a str,
    pub payload: &'a [u8],
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Encodes a request frame.
///
/// An empty `payload` means the call carries no arguments.
///
/// # Errors
///
/// Returns [`FrameError::NameTooLong`] if `name` exceeds 255 bytes.
///
/// # Examples
///
/// ```rust
/// use aof_core::protocol::frame::{encode_request, decode_request};
///
/// let bytes = encode_request(7, "user_sources", &[]).unwrap();
/// let frame = decode_request(&bytes).unwrap();
/// assert_eq!(frame.id, 7);
/// assert_eq!(frame.name, "user_sources");
/// assert!(frame.payload.is_empty());
/// ```
pub fn encode_request(id: RequestId, name: &str, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let name_len = checked_name_len(name)?;
    let mut buf = Vec::with_capacity(1 + 4 + 1 + name.len() + payload.len());
    buf.push(TAG_REQUEST);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.push(name_len);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decodes one server→client frame.
///
/// # Errors
///
/// Returns [`FrameError`] if the tag is unknown, a header field is cut off, an
/// event name is not UTF-8, or a response declares more than
/// [`MAX_RESPONSE_LEN`] bytes.
pub fn decode_server_frame(bytes: &[u8]) -> Result<ServerFrame<'_>, FrameError> {
    let (&tag, _) = bytes.split_first().ok_or(FrameError::Empty)?;

    match tag {
        TAG_RESPONSE => {
            let id = read_u32(bytes, 1)?;
            let total_len = read_u32(bytes, 5)? as usize;
            if total_len > MAX_RESPONSE_LEN {
                return Err(FrameError::ResponseTooLarge {
                    id,
                    declared: total_len,
                    max: MAX_RESPONSE_LEN,
                });
            }
            Ok(ServerFrame::Response {
                id,
                total_len,
                chunk: &bytes[9..],
            })
        }
        TAG_RESPONSE_CONTINUATION => {
            let id = read_u32(bytes, 1)?;
            Ok(ServerFrame::Continuation {
                id,
                chunk: &bytes[5..],
            })
        }
        TAG_RESPONSE_FAILURE => {
            let id = read_u32(bytes, 1)?;
            Ok(ServerFrame::Failure { id })
        }
        TAG_EVENT => {
            let (name, end) = read_name(bytes, 1)?;
            Ok(ServerFrame::Event {
                name,
                payload: &bytes[end..],
            })
        }
        other => Err(FrameError::UnknownTag(other)),
    }
}

// ── Server side (fixtures, tests, benches) ────────────────────────────────────

impl ServerFrame<'_> {
    /// Encodes this frame into its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NameTooLong`] for an event name over 255 bytes and
    /// [`FrameError::ResponseTooLarge`] when `total_len` does not fit in 32 bits.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::new();
        match *self {
            ServerFrame::Response {
                id,
                total_len,
                chunk,
            } => {
                let declared = u32::try_from(total_len).map_err(|_| FrameError::ResponseTooLarge {
                    id,
                    declared: total_len,
                    max: u32::MAX as usize,
                })?;
                buf.reserve(9 + chunk.len());
                buf.push(TAG_RESPONSE);
                buf.extend_from_slice(&id.to_be_bytes());
                buf.extend_from_slice(&declared.to_be_bytes());
                buf.extend_from_slice(chunk);
            }
            ServerFrame::Continuation { id, chunk } => {
                buf.reserve(5 + chunk.len());
                buf.push(TAG_RESPONSE_CONTINUATION);
                buf.extend_from_slice(&id.to_be_bytes());
                buf.extend_from_slice(chunk);
            }
            ServerFrame::Failure { id } => {
                buf.push(TAG_RESPONSE_FAILURE);
                buf.extend_from_slice(&id.to_be_bytes());
            }
            ServerFrame::Event { name, payload } => {
                let name_len = checked_name_len(name)?;
                buf.reserve(2 + name.len() + payload.len());
                buf.push(TAG_EVENT);
                buf.push(name_len);
                buf.extend_from_slice(name.as_bytes());
                buf.extend_from_slice(payload);
            }
        }
        Ok(buf)
    }
}

/// Decodes a client→server request frame.
///
/// # Errors
///
/// Returns [`FrameError`] if the tag is not [`TAG_REQUEST`] or the header is
/// truncated.
pub fn decode_request(bytes: &[u8]) -> Result<RequestFrame<'_>, FrameError> {
    let (&tag, _) = bytes.split_first().ok_or(FrameError::Empty)?;
    if tag != TAG_REQUEST {
        return Err(FrameError::UnknownTag(tag));
    }
    let id = read_u32(bytes, 1)?;
    let (name, end) = read_name(bytes, 5)?;
    Ok(RequestFrame {
        id,
        name,
        payload: &bytes[end..],
    })
}

/// Splits `payload` into a response frame followed by continuation frames of at
/// most `chunk_len` bytes each.
///
/// An empty payload produces a single response frame with an empty chunk.
///
/// # Errors
///
/// Returns [`FrameError::ResponseTooLarge`] if the payload length does not fit
/// in 32 bits.
pub fn split_response(
    id: RequestId,
    payload: &[u8],
    chunk_len: usize,
) -> Result<Vec<Vec<u8>>, FrameError> {
    let chunk_len = chunk_len.max(1);
    let mut chunks = payload.chunks(chunk_len);
    let first = chunks.next().unwrap_or(&[]);

    let mut frames = vec![ServerFrame::Response {
        id,
        total_len: payload.len(),
        chunk: first,
    }
    .encode()?];
    for chunk in chunks {
        frames.push(ServerFrame::Continuation { id, chunk }.encode()?);
    }
    Ok(frames)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn checked_name_len(name: &str) -> Result<u8, FrameError> {
    u8::try_from(name.len()).map_err(|_| FrameError::NameTooLong(name.len()))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, FrameError> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or(FrameError::Truncated {
            needed: offset + 4,
            available: buf.len(),
        })?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a 1-byte length prefix and the UTF-8 name following it.
///
/// Returns the name and the offset of the first byte after it.
fn read_name(buf: &[u8], offset: usize) -> Result<(&str, usize), FrameError> {
    let len = *buf.get(offset).ok_or(FrameError::Truncated {
        needed: offset + 1,
        available: buf.len(),
    })? as usize;
    let start = offset + 1;
    let end = start + len;
    let raw = buf.get(start..end).ok_or(FrameError::Truncated {
        needed: end,
        available: buf.len(),
    })?;
    let name = std::str::from_utf8(raw).map_err(|_| FrameError::InvalidName)?;
    Ok((name, end))
}
