//! Error types for the pipeline components.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the stream worker.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("socket read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk header: payload length is zero")]
    EmptyChunk,

    #[error("sink rejected packet: {0}")]
    Sink(#[from] SinkError),
}

/// Errors produced by a packet sink (`open` or `push`).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Errors produced by the decoding sink.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not open codec: {0}")]
    CodecOpen(ffmpeg_next::Error),

    #[error("could not send video packet: {0}")]
    Send(ffmpeg_next::Error),

    #[error("could not receive video frame: {0}")]
    Receive(ffmpeg_next::Error),

    #[error("decoder is not open")]
    NotOpen,
}

/// Errors produced by the recorder and its muxing sink.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("could not find muxer '{0}'")]
    MuxerNotFound(&'static str),

    #[error("failed to open output file {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: ffmpeg_next::Error,
    },

    #[error("could not start recorder thread: {0}")]
    Thread(std::io::Error),

    #[error("the first packet is not a config packet")]
    FirstPacketNotConfig,

    #[error("muxer error: {0}")]
    Muxer(#[from] ffmpeg_next::Error),

    #[error("recorder already failed")]
    Failed,

    #[error("recorder is not open")]
    NotOpen,
}
