//! H.264 decoding into the display buffer.
//!
//! The decoder is the synchronous packet sink: `push` submits the access
//! unit to FFmpeg and attempts one frame receive, depositing any decoded
//! frame into the video buffer's producer slot.

pub mod h264;

pub use h264::{AccessUnit, AccessUnitParser};

use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, Rational};
use log::warn;

use crate::display::VideoBuffer;
use crate::error::{DecodeError, SinkError};
use crate::pipeline::{CodecId, Packet, PacketSink};
use crate::utils::ffmpeg::ensure_init;
use crate::utils::SignalOfStop;

pub struct Decoder {
    buffer: Arc<VideoBuffer>,
    state: Option<OpenDecoder>,
    sos: SignalOfStop,
}

struct OpenDecoder {
    decoder: ffmpeg::decoder::Opened,
    frame: ffmpeg::frame::Video,
}

// Safety: the codec context is owned and, once the sink is handed to the
// stream, only driven from the stream worker thread.
unsafe impl Send for Decoder {}

impl Decoder {
    pub fn new(buffer: Arc<VideoBuffer>) -> Self {
        // The interrupt capability is the buffer's stop signal, so
        // cancelling it from any handle unblocks the consumer side.
        let sos = buffer.interrupt_signal();
        Self {
            buffer,
            state: None,
            sos,
        }
    }

    /// Unblock anything waiting on the consumer side of the pipeline.
    /// Used by the stream to request termination.
    pub fn interrupt(&self) {
        self.sos.cancel();
    }

    /// Cloneable handle to this sink's interrupt capability.
    pub fn interrupter(&self) -> SignalOfStop {
        self.sos.clone()
    }
}

impl PacketSink for Decoder {
    fn open(&mut self, codec: CodecId) -> Result<(), SinkError> {
        ensure_init();

        let mut parameters = codec::Parameters::new();
        unsafe {
            let parameters = &mut *parameters.as_mut_ptr();
            parameters.codec_type = ffmpeg::media::Type::Video.into();
            parameters.codec_id = av_codec_id(codec).into();
        }

        let mut context =
            codec::Context::from_parameters(parameters).map_err(DecodeError::CodecOpen)?;
        unsafe {
            // packets carry microsecond timestamps
            (*context.as_mut_ptr()).pkt_timebase = Rational::new(1, 1_000_000).into();
        }

        let decoder = context
            .decoder()
            .open_as(av_codec_id(codec))
            .map_err(DecodeError::CodecOpen)?;

        self.state = Some(OpenDecoder {
            decoder,
            frame: ffmpeg::frame::Video::empty(),
        });
        Ok(())
    }

    fn push(&mut self, packet: &Packet) -> Result<(), SinkError> {
        if packet.is_config() {
            // config packets carry extradata for the recorder, nothing
            // to decode
            return Ok(());
        }

        let state = self.state.as_mut().ok_or(DecodeError::NotOpen)?;

        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_pts(packet.pts);
        av_packet.set_dts(packet.dts);
        if packet.key_frame {
            av_packet.set_flags(codec::packet::Flags::KEY);
        }

        state
            .decoder
            .send_packet(&av_packet)
            .map_err(DecodeError::Send)?;

        match state.decoder.receive_frame(&mut state.frame) {
            Ok(()) => offer_frame(&self.buffer, &state.frame, packet.pts),
            Err(ffmpeg::Error::Other {
                errno: ffmpeg::error::EAGAIN,
            }) => {
                // the decoder needs more input before the next frame
            }
            Err(err) => return Err(DecodeError::Receive(err).into()),
        }

        Ok(())
    }

    fn close(&mut self) {
        self.state = None;
    }

    fn name(&self) -> &'static str {
        "decoder"
    }
}

/// Pack the decoded frame into the display buffer and publish it. A lost
/// frame does not fail the pipeline.
fn offer_frame(buffer: &VideoBuffer, frame: &ffmpeg::frame::Video, packet_pts: Option<i64>) {
    if frame.format() != ffmpeg::format::Pixel::YUV420P {
        warn!(
            "Unsupported decoder output format {:?}, dropping frame",
            frame.format()
        );
        return;
    }

    let width = frame.width() as usize;
    let height = frame.height() as usize;

    let mut producer = buffer.producer_frame();
    producer.fill_yuv420(
        width,
        height,
        (frame.data(0), frame.stride(0)),
        (frame.data(1), frame.stride(1)),
        (frame.data(2), frame.stride(2)),
    );
    producer.pts = frame.pts().or(packet_pts);
    producer.offer();
}

fn av_codec_id(codec: CodecId) -> codec::Id {
    match codec {
        CodecId::H264 => codec::Id::H264,
    }
}
