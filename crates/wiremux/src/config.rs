/// Configuration for a multiplexer session.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Frames the combined output may buffer ahead of its consumer.
    ///
    /// This is the demand window: source reads are only scheduled while
    /// the buffer has unclaimed capacity. Default: 1 (strictly
    /// demand-driven).
    pub capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self { capacity: 1 }
    }
}

/// Configuration for a demultiplexer session.
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Items each output stream may buffer ahead of its consumer.
    ///
    /// Routing awaits a full output's demand, propagating backpressure to
    /// the combined input. Default: 16.
    pub capacity: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}
