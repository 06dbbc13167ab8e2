/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    /// The byte where a frame marker was expected is not `0x01`.
    #[error("invalid frame marker {byte:#04x} (expected 0x01)")]
    InvalidMarker { byte: u8 },

    /// The wire ended before a complete 4-byte header arrived.
    #[error("truncated frame header ({got} of 4 bytes)")]
    TruncatedHeader { got: usize },

    /// The stream id does not fit the one-byte header field.
    #[error("stream id {id} out of range (max {max})")]
    IdOutOfRange { id: u8, max: u8 },

    /// A header field byte is below the field offset and cannot encode
    /// any value.
    #[error("invalid header field byte {byte:#04x}")]
    InvalidFieldByte { byte: u8 },

    /// Bytes appeared on the wire before the first frame marker.
    #[error("unframed data before first frame marker")]
    StrayData,

    /// The payload value could not be JSON-encoded.
    #[error("payload is not JSON-serializable: {0}")]
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
