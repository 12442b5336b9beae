pub mod frame;
pub mod headers;

pub use frame::{decode_body, encode_body, generate_request_id, Frame, ProtocolError, MAX_FRAME_BYTES};
