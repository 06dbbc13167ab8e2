use wiremux_frame::FrameError;
use wiremux_stream::SourceError;

/// Errors surfaced on the combined output of [`mux`](crate::mux::mux).
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// No source streams were supplied.
    #[error("no source streams supplied")]
    NoSources,

    /// More sources than the one-byte id field can address.
    #[error("cannot multiplex {count} streams: ids are limited to 0..={max}")]
    TooManySources { count: usize, max: u8 },

    /// A frame could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A read against source `id` rejected, failing the whole session.
    #[error("source stream {id} failed: {source}")]
    Source { id: u8, source: SourceError },
}

/// Errors surfaced on the outputs of [`demux`](crate::demux::demux).
#[derive(Debug, Clone, thiserror::Error)]
pub enum DemuxError {
    /// The stream count must be a positive integer.
    #[error("stream count must be a positive integer")]
    InvalidStreamCount,

    /// A frame referenced an id outside the registered outputs.
    #[error("frame references unknown stream id {id} (demuxing {count} streams)")]
    UnknownStreamId { id: u8, count: usize },

    /// The combined wire carried a malformed frame.
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    /// The combined input stream aborted before completing.
    #[error("The demuxer stream was aborted: {0}")]
    Aborted(String),
}
