//! castview — real-time H.264 stream player and recorder.
//!
//! The pipeline ingests a framed H.264 byte stream from a TCP socket,
//! fans it out to a live decoder (for display) and an optional muxing
//! recorder (for on-disk capture), and shuts down cleanly when either
//! end fails or the operator requests stop.

pub mod config;
pub mod decoder;
pub mod display;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod recorder;
pub mod utils;

pub use decoder::Decoder;
pub use display::{FrameListener, VideoBuffer, VideoFrame};
pub use events::{event_channel, EventQueue, PipelineEvent};
pub use pipeline::{CodecId, FrameSize, Packet, PacketSink, Stream};
pub use recorder::{RecordFormat, Recorder};
