//! Packet sink trait.
//!
//! Components able to consume codec-level packets implement this trait;
//! the stream holds a fixed set of sinks and pushes every parsed access
//! unit to each of them in declaration order.

use crate::error::SinkError;
use crate::pipeline::types::{CodecId, Packet};

pub trait PacketSink: Send {
    /// Acquire external resources (codec context, output file, worker
    /// thread) for the given codec.
    fn open(&mut self, codec: CodecId) -> Result<(), SinkError>;

    /// Consume one packet. The packet is borrowed; implementations that
    /// retain it past the call clone the payload handle.
    ///
    /// An error is fatal to the pipeline: the stream worker logs it and
    /// terminates.
    fn push(&mut self, packet: &Packet) -> Result<(), SinkError>;

    /// Release the resources acquired by `open`. Idempotent.
    fn close(&mut self);

    /// Name used in stream worker logs.
    fn name(&self) -> &'static str;
}
