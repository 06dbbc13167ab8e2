//! N:1:N push-stream multiplexing over a single byte channel.
//!
//! [`mux`] combines N independent source streams into one framed byte
//! stream suitable for a single transport connection; [`demux`] consumes
//! that byte stream — however the transport re-chunked it — and
//! reconstructs the N streams in per-id order.
//!
//! # Crate Structure
//!
//! - [`stream`] — Push-stream primitives ([`Item`], [`Source`])
//! - [`frame`] — Marker-delimited frame codec
//! - [`mux`]/[`demux`] — The scheduling and reassembly engines
//!
//! Production is demand-driven: no source is read ahead of the combined
//! consumer's backpressure window, and a slow source never starves the
//! others — readers are serviced round-robin, skipping any with a read
//! already in flight.

pub mod config;
pub mod demux;
pub mod error;
pub mod mux;

/// Re-export frame codec types.
pub mod frame {
    pub use wiremux_frame::*;
}

/// Re-export push-stream types.
pub mod stream {
    pub use wiremux_stream::*;
}

pub use config::{DemuxConfig, MuxConfig};
pub use demux::{demux, demux_with_config, DemuxStream};
pub use error::{DemuxError, MuxError};
pub use mux::{mux, mux_with_config, MuxStream, MAX_STREAMS};
pub use wiremux_stream::{source_channel, ChannelSource, Item, Source, SourceError, SourceSender};
