//! Protocol module containing the frame codec, payload helpers, the partial
//! decoder, and the request id counter.

pub mod frame;
pub mod partial;
pub mod payload;
pub mod request_id;

pub use frame::{
    decode_request, decode_server_frame, encode_request, split_response, FrameError,
    RequestFrame, RequestId, ServerFrame, MAX_CHUNK_LEN, MAX_RESPONSE_LEN,
};
pub use partial::partial_decode;
pub use payload::PayloadError;
pub use request_id::RequestIdCounter;
