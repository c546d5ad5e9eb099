//! Core types for the pipeline system

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Wire sentinel for an unset PTS (config packets).
pub const NO_PTS: u64 = u64::MAX;

/// A codec-level packet: one complete access unit plus timing metadata.
///
/// The payload is reference-counted; sinks that need to retain a packet
/// past `push` clone the handle, not the bytes.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Encoded bitstream data (one or more complete NAL units).
    pub data: Bytes,

    /// Presentation timestamp in microseconds. `None` marks a config
    /// packet carrying codec extradata (SPS/PPS) instead of a frame.
    pub pts: Option<i64>,

    /// Decode timestamp in microseconds. The wire protocol carries a
    /// single timestamp, so this matches `pts`.
    pub dts: Option<i64>,

    /// Duration in microseconds. Unknown (0) until the recorder infers it
    /// from the successor's PTS.
    pub duration: i64,

    /// Whether the parser reported this access unit as a keyframe.
    pub key_frame: bool,
}

impl Packet {
    pub fn new(data: Bytes, pts: Option<i64>, key_frame: bool) -> Self {
        Self {
            data,
            pts,
            dts: pts,
            duration: 0,
            key_frame,
        }
    }

    /// Decode the wire PTS field: all-ones means unset.
    pub fn pts_from_wire(raw: u64) -> Option<i64> {
        if raw == NO_PTS {
            None
        } else {
            Some(raw as i64)
        }
    }

    pub fn is_config(&self) -> bool {
        self.pts.is_none()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Codec identifier handed to sinks at `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    H264,
}

impl CodecId {
    /// FFmpeg decoder/codec name.
    pub fn name(&self) -> &'static str {
        match self {
            CodecId::H264 => "h264",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared video frame size, as announced by the caster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for FrameSize {
    type Err = String;

    /// Parse a `WIDTHxHEIGHT` string such as `1920x1080`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("invalid size {s:?}, expected WIDTHxHEIGHT"))?;

        let width = w.parse().map_err(|_| format!("invalid width {w:?}"))?;
        let height = h.parse().map_err(|_| format!("invalid height {h:?}"))?;

        Ok(FrameSize { width, height })
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
