//! Muxing sink boundary and its FFmpeg implementation.

use std::path::Path;
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, format, Rational};

use super::RecordFormat;
use crate::config;
use crate::error::RecordError;
use crate::pipeline::{CodecId, FrameSize, Packet};
use crate::utils::ffmpeg::ensure_init;

/// Pipeline time base: timestamps are in microseconds.
const TIME_BASE: Rational = Rational(1, 1_000_000);

/// Container writer driven by the recorder's writer thread.
///
/// The boundary mirrors the container lifecycle: one header carrying the
/// codec extradata, any number of data packets, one trailer.
pub trait MuxSink: Send {
    fn write_header(&mut self, extradata: &[u8]) -> Result<(), RecordError>;

    /// Write one data packet. Timestamps and duration are in the pipeline
    /// time base (1/1_000_000 s) and are rescaled into the stream's
    /// native time base before submission.
    fn write_packet(&mut self, packet: &Packet) -> Result<(), RecordError>;

    fn write_trailer(&mut self) -> Result<(), RecordError>;
}

/// `MuxSink` over libavformat via `ffmpeg_next`.
pub struct FfmpegMuxer {
    octx: format::context::Output,
    /// Chosen by the muxer once the header is written.
    stream_time_base: Option<Rational>,
}

// Safety: the output context is owned and only ever driven from the
// recorder's writer thread after open.
unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    /// Resolve the muxer by format name, create the output file and the
    /// single video stream. The container header is deferred until the
    /// config packet delivers the codec extradata.
    pub fn open(
        path: &Path,
        format: RecordFormat,
        codec: CodecId,
        declared_size: FrameSize,
    ) -> Result<Self, RecordError> {
        ensure_init();

        let mut octx =
            format::output_as(&path, format.muxer_name()).map_err(|err| match err {
                ffmpeg::Error::MuxerNotFound => RecordError::MuxerNotFound(format.muxer_name()),
                source => RecordError::OpenFailed {
                    path: path.to_owned(),
                    source,
                },
            })?;

        let codec_id = av_codec_id(codec);
        let mut stream = octx.add_stream(codec_id)?;
        stream.set_time_base(TIME_BASE);

        let codecpar = unsafe { &mut *(*stream.as_mut_ptr()).codecpar };
        codecpar.codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
        codecpar.codec_id = codec_id.into();
        codecpar.format = ffmpeg::ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
        codecpar.width = declared_size.width as i32;
        codecpar.height = declared_size.height as i32;

        let mut metadata = ffmpeg::Dictionary::new();
        metadata.set(
            "comment",
            &format!("Recorded by {} {}", config::app_name(), config::version()),
        );
        octx.set_metadata(metadata);

        Ok(Self {
            octx,
            stream_time_base: None,
        })
    }
}

impl MuxSink for FfmpegMuxer {
    fn write_header(&mut self, extradata: &[u8]) -> Result<(), RecordError> {
        {
            let mut stream = self.octx.streams_mut().next().ok_or(RecordError::NotOpen)?;
            let codecpar = unsafe { &mut *(*stream.as_mut_ptr()).codecpar };
            unsafe {
                // The allocation must be extradata_size +
                // AV_INPUT_BUFFER_PADDING_SIZE bytes, padding zeroed.
                codecpar.extradata = ffmpeg::ffi::av_mallocz(
                    extradata.len() + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
                ) as *mut u8;
                ptr::copy(extradata.as_ptr(), codecpar.extradata, extradata.len());
                codecpar.extradata_size = extradata.len() as i32;
            }
        }

        self.octx.write_header()?;

        // The muxer is free to pick its own time base; read it back now
        // so packet rescaling targets what actually went into the header.
        self.stream_time_base = Some(
            self.octx
                .stream(0)
                .ok_or(RecordError::NotOpen)?
                .time_base(),
        );
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<(), RecordError> {
        let stream_time_base = self.stream_time_base.ok_or(RecordError::NotOpen)?;

        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_pts(packet.pts);
        av_packet.set_dts(packet.dts);
        av_packet.set_duration(packet.duration);
        av_packet.set_position(-1);
        av_packet.set_stream(0);
        if packet.key_frame {
            av_packet.set_flags(codec::packet::Flags::KEY);
        }
        av_packet.rescale_ts(TIME_BASE, stream_time_base);

        av_packet.write_interleaved(&mut self.octx)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), RecordError> {
        self.octx.write_trailer()?;
        Ok(())
    }
}

fn av_codec_id(codec: CodecId) -> codec::Id {
    match codec {
        CodecId::H264 => codec::Id::H264,
    }
}
