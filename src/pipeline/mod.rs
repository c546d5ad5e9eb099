//! Pipeline core: data model, the packet sink contract and the stream
//! worker that feeds the sinks.
//!
//! Data flows socket → stream (deframe, parse into complete access
//! units) → fan-out to the decoder and recorder sinks. Each sink owns
//! its internal concurrency: the recorder is asynchronous behind a
//! writer thread, the decoder is synchronous.

pub mod sink;
pub mod stream;
pub mod types;

pub use sink::PacketSink;
pub use stream::Stream;
pub use types::{CodecId, FrameSize, Packet, NO_PTS};
