//! Push-stream primitives for wiremux.
//!
//! This is the lowest layer of wiremux. It defines the [`Item`] value type
//! that streams carry, the [`Source`] interface the multiplexer reads from,
//! and a bounded channel-backed source for producers. Everything else
//! builds on top of these types.

pub mod error;
pub mod item;
pub mod source;

pub use error::{Result, SourceError};
pub use item::Item;
pub use source::{source_channel, ChannelSource, Source, SourceSender};
