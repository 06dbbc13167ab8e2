//! Marker-delimited frame codec for wiremux.
//!
//! Every frame on the combined wire is a fixed 4-byte header followed by
//! payload bytes:
//! - A `0x01` start-of-frame marker
//! - The source stream id, offset by 5
//! - The terminal flag, offset by 5
//! - The raw-payload flag, offset by 5
//!
//! The offset keeps every header byte distinct from the marker. There is
//! no payload length field; receivers recover frame boundaries by scanning
//! for the next marker, however the transport happened to chunk the bytes.

pub mod codec;
pub mod error;
pub mod payload;

pub use codec::{
    decode_frame, decode_header, encode_frame, encode_header, Frame, Header, FIELD_OFFSET,
    HEADER_SIZE, MARKER, MAX_STREAM_ID,
};
pub use error::{FrameError, Result};
pub use payload::{deserialize_item, serialize_item};
