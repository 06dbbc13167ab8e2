/// Errors produced by source streams.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The consumer side is gone; the source no longer accepts items.
    #[error("source stream closed")]
    Closed,

    /// The producer reported a failure.
    #[error("source read failed: {0}")]
    Read(String),

    /// An I/O error in an I/O-backed source.
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;
