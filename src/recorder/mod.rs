//! Asynchronous recording to an MP4 or Matroska container.
//!
//! The recorder is a packet sink with its own writer thread: `push`
//! clones the packet into a FIFO queue and returns immediately, so the
//! stream worker never blocks on disk I/O. The writer infers per-packet
//! durations from the PTS delta to each packet's successor, which needs
//! one packet of look-ahead held in a writer-private slot.

pub mod muxer;

pub use muxer::{FfmpegMuxer, MuxSink};

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::error::{RecordError, SinkError};
use crate::pipeline::{CodecId, FrameSize, Packet, PacketSink};

/// Duration assigned to the final packet, whose successor never arrives.
const LAST_PACKET_DURATION: i64 = 100_000; // µs

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Mp4,
    Matroska,
}

impl RecordFormat {
    /// libavformat muxer name.
    pub fn muxer_name(&self) -> &'static str {
        match self {
            RecordFormat::Mp4 => "mp4",
            RecordFormat::Matroska => "matroska",
        }
    }

    /// Infer the format from the output filename extension.
    pub fn from_path(path: &Path) -> Option<RecordFormat> {
        match path.extension()?.to_str()? {
            "mp4" => Some(RecordFormat::Mp4),
            "mkv" => Some(RecordFormat::Matroska),
            _ => None,
        }
    }
}

impl FromStr for RecordFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp4" => Ok(RecordFormat::Mp4),
            "mkv" | "matroska" => Ok(RecordFormat::Matroska),
            other => Err(format!("unknown record format {other:?}")),
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.muxer_name())
    }
}

struct QueueState {
    queue: VecDeque<Packet>,
    stopped: bool,
    failed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    cond: Condvar,
}

pub struct Recorder {
    filename: PathBuf,
    format: RecordFormat,
    declared_size: FrameSize,
    shared: Arc<Shared>,
    writer: Option<JoinHandle<()>>,
}

impl Recorder {
    pub fn new(
        filename: impl Into<PathBuf>,
        format: RecordFormat,
        declared_size: FrameSize,
    ) -> Self {
        Self {
            filename: filename.into(),
            format,
            declared_size,
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    stopped: false,
                    failed: false,
                }),
                cond: Condvar::new(),
            }),
            writer: None,
        }
    }

    /// Open the output container and start the writer thread.
    pub fn open(&mut self, codec: CodecId) -> Result<(), RecordError> {
        let muxer = FfmpegMuxer::open(&self.filename, self.format, codec, self.declared_size)?;
        self.open_with(Box::new(muxer))?;

        info!(
            "Recording started to {} file: {}",
            self.format,
            self.filename.display()
        );
        Ok(())
    }

    /// Start the writer thread over an arbitrary muxing sink.
    pub fn open_with(&mut self, muxer: Box<dyn MuxSink>) -> Result<(), RecordError> {
        debug!("Starting recorder thread");

        let shared = Arc::clone(&self.shared);
        let filename = self.filename.clone();
        let format = self.format;

        let writer = thread::Builder::new()
            .name("recorder".into())
            .spawn(move || run_writer(shared, muxer, filename, format))
            .map_err(RecordError::Thread)?;

        self.writer = Some(writer);
        Ok(())
    }

    /// Queue one packet for writing. Callable from any thread; must not
    /// be called after `close`. Rejects once the writer has failed.
    pub fn push(&self, packet: &Packet) -> Result<(), RecordError> {
        let mut state = self.shared.state.lock().unwrap();
        assert!(!state.stopped, "push() called after close()");

        if state.failed {
            // reject any new packet (this will stop the stream)
            return Err(RecordError::Failed);
        }

        state.queue.push_back(packet.clone());
        self.shared.cond.notify_one();
        Ok(())
    }

    /// Signal the writer to finish and wait for it. The writer drains the
    /// remaining queue first, so everything pushed before `close` lands
    /// in the file.
    pub fn close(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopped = true;
            self.shared.cond.notify_one();
        }

        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }

    /// Monotonic failure flag: once set, every `push` is rejected.
    pub fn failed(&self) -> bool {
        self.shared.state.lock().unwrap().failed
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.close();
        }
    }
}

impl PacketSink for Recorder {
    fn open(&mut self, codec: CodecId) -> Result<(), SinkError> {
        Recorder::open(self, codec).map_err(SinkError::from)
    }

    fn push(&mut self, packet: &Packet) -> Result<(), SinkError> {
        Recorder::push(self, packet).map_err(SinkError::from)
    }

    fn close(&mut self) {
        Recorder::close(self);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

fn run_writer(
    shared: Arc<Shared>,
    mut muxer: Box<dyn MuxSink>,
    filename: PathBuf,
    format: RecordFormat,
) {
    // Only this thread touches the look-ahead slot and the header flag.
    let mut previous: Option<Packet> = None;
    let mut header_written = false;

    loop {
        let mut state = shared.state.lock().unwrap();

        while !state.stopped && state.queue.is_empty() {
            state = shared.cond.wait(state).unwrap();
        }

        // Once stopped, keep processing the remaining packets so the
        // recording is complete through shutdown.
        if state.stopped && state.queue.is_empty() {
            drop(state);

            if let Some(mut last) = previous.take() {
                // No successor will ever reveal this packet's duration.
                last.duration = LAST_PACKET_DURATION;
                if let Err(err) = write(muxer.as_mut(), &mut header_written, &last) {
                    // No future frame depends on the last one; the file
                    // is still valid without it.
                    warn!("Could not record last packet: {err}");
                }
            }
            break;
        }

        let current = state.queue.pop_front().unwrap();
        drop(state);

        let current_pts = current.pts;
        let Some(mut packet) = previous.replace(current) else {
            // first packet, nothing to write yet
            continue;
        };

        // Config packets have no PTS and take no part in duration
        // inference.
        if let (Some(prev_pts), Some(curr_pts)) = (packet.pts, current_pts) {
            packet.duration = curr_pts - prev_pts;
        }

        if let Err(err) = write(muxer.as_mut(), &mut header_written, &packet) {
            error!("Could not record packet: {err}");

            let mut state = shared.state.lock().unwrap();
            state.failed = true;
            state.queue.clear();
            drop(state);
            break;
        }
    }

    let mut failed = shared.state.lock().unwrap().failed;
    if !failed {
        if header_written {
            if let Err(err) = muxer.write_trailer() {
                error!("Failed to write trailer to {}: {err}", filename.display());
                failed = true;
            }
        } else {
            // the recorded file is empty
            failed = true;
        }

        if failed {
            shared.state.lock().unwrap().failed = true;
        }
    }

    if failed {
        error!("Recording failed to {}", filename.display());
    } else {
        info!(
            "Recording complete to {} file: {}",
            format,
            filename.display()
        );
    }

    debug!("Recorder thread ended");
}

fn write(
    muxer: &mut dyn MuxSink,
    header_written: &mut bool,
    packet: &Packet,
) -> Result<(), RecordError> {
    if !*header_written {
        if !packet.is_config() {
            error!("The first packet is not a config packet");
            return Err(RecordError::FirstPacketNotConfig);
        }
        muxer.write_header(&packet.data)?;
        *header_written = true;
        return Ok(());
    }

    if packet.is_config() {
        // ignore mid-stream config packets
        return Ok(());
    }

    muxer.write_packet(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct MockCalls {
        extradata: Option<Vec<u8>>,
        packets: Vec<WrittenPacket>,
        trailer: bool,
    }

    #[derive(Debug, PartialEq, Eq)]
    struct WrittenPacket {
        pts: Option<i64>,
        duration: i64,
        data: Vec<u8>,
    }

    #[derive(Debug, Default)]
    struct MockState {
        calls: Mutex<MockCalls>,
        fail_after: Option<usize>,
        fail_trailer: bool,
    }

    struct MockMuxer(Arc<MockState>);

    impl MuxSink for MockMuxer {
        fn write_header(&mut self, extradata: &[u8]) -> Result<(), RecordError> {
            self.0.calls.lock().unwrap().extradata = Some(extradata.to_vec());
            Ok(())
        }

        fn write_packet(&mut self, packet: &Packet) -> Result<(), RecordError> {
            let mut calls = self.0.calls.lock().unwrap();
            if self.0.fail_after == Some(calls.packets.len()) {
                return Err(RecordError::Muxer(ffmpeg_next::Error::Unknown));
            }
            calls.packets.push(WrittenPacket {
                pts: packet.pts,
                duration: packet.duration,
                data: packet.data.to_vec(),
            });
            Ok(())
        }

        fn write_trailer(&mut self) -> Result<(), RecordError> {
            if self.0.fail_trailer {
                return Err(RecordError::Muxer(ffmpeg_next::Error::Unknown));
            }
            self.0.calls.lock().unwrap().trailer = true;
            Ok(())
        }
    }

    fn recorder_with_mock(state: &Arc<MockState>) -> Recorder {
        let mut recorder = Recorder::new(
            "/tmp/recording.mp4",
            RecordFormat::Mp4,
            FrameSize {
                width: 1920,
                height: 1080,
            },
        );
        recorder
            .open_with(Box::new(MockMuxer(Arc::clone(state))))
            .unwrap();
        recorder
    }

    fn config(data: &'static [u8]) -> Packet {
        Packet::new(Bytes::from_static(data), None, false)
    }

    fn data(pts: i64, data: &'static [u8]) -> Packet {
        Packet::new(Bytes::from_static(data), Some(pts), false)
    }

    fn wait_failed(recorder: &Recorder) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !recorder.failed() {
            assert!(Instant::now() < deadline, "recorder never failed");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_clean_two_frame_record() {
        let state = Arc::new(MockState::default());
        let mut recorder = recorder_with_mock(&state);

        recorder.push(&config(&[0x01, 0x02, 0x03, 0x04])).unwrap();
        recorder.push(&data(1000, &[0xaa])).unwrap();
        recorder.push(&data(4000, &[0xbb])).unwrap();
        recorder.close();

        assert!(!recorder.failed());

        let calls = state.calls.lock().unwrap();
        assert_eq!(calls.extradata.as_deref(), Some(&[1, 2, 3, 4][..]));
        assert_eq!(
            calls.packets,
            vec![
                WrittenPacket {
                    pts: Some(1000),
                    duration: 3000,
                    data: vec![0xaa],
                },
                WrittenPacket {
                    pts: Some(4000),
                    duration: LAST_PACKET_DURATION,
                    data: vec![0xbb],
                },
            ]
        );
        assert!(calls.trailer);
    }

    #[test]
    fn test_drains_queue_in_push_order_on_close() {
        let state = Arc::new(MockState::default());
        let mut recorder = recorder_with_mock(&state);

        recorder.push(&config(&[0x67])).unwrap();
        for i in 0..200i64 {
            let packet = Packet::new(Bytes::from(vec![i as u8]), Some(i * 1000), false);
            recorder.push(&packet).unwrap();
        }
        recorder.close();

        assert!(!recorder.failed());

        let calls = state.calls.lock().unwrap();
        assert_eq!(calls.packets.len(), 200);
        for (i, packet) in calls.packets.iter().enumerate() {
            assert_eq!(packet.pts, Some(i as i64 * 1000));
            assert_eq!(packet.data, vec![i as u8]);
            if i + 1 < calls.packets.len() {
                assert_eq!(packet.duration, 1000);
            } else {
                assert_eq!(packet.duration, LAST_PACKET_DURATION);
            }
        }
        assert!(calls.trailer);
    }

    #[test]
    fn test_bad_first_packet_fails_without_trailer() {
        let state = Arc::new(MockState::default());
        let mut recorder = recorder_with_mock(&state);

        recorder.push(&data(500, &[0xaa])).unwrap();
        recorder.close();

        assert!(recorder.failed());

        let calls = state.calls.lock().unwrap();
        assert_eq!(calls.extradata, None);
        assert!(calls.packets.is_empty());
        assert!(!calls.trailer);
    }

    #[test]
    fn test_write_failure_drains_and_rejects_pushes() {
        let state = Arc::new(MockState {
            fail_after: Some(2),
            ..Default::default()
        });
        let mut recorder = recorder_with_mock(&state);

        recorder.push(&config(&[0x67])).unwrap();
        for i in 0..6i64 {
            // pushes may start failing as soon as the writer hits the
            // injected error
            let _ = recorder.push(&data(i * 1000, &[0xaa]));
        }

        wait_failed(&recorder);
        assert!(matches!(
            recorder.push(&data(99_000, &[0xbb])),
            Err(RecordError::Failed)
        ));

        recorder.close();

        let calls = state.calls.lock().unwrap();
        assert_eq!(calls.packets.len(), 2);
        assert!(!calls.trailer);
    }

    #[test]
    fn test_mid_stream_config_packets_are_dropped() {
        let state = Arc::new(MockState::default());
        let mut recorder = recorder_with_mock(&state);

        recorder.push(&config(&[0x67])).unwrap();
        recorder.push(&data(1000, &[0xaa])).unwrap();
        recorder.push(&config(&[0x68])).unwrap();
        recorder.push(&data(2000, &[0xbb])).unwrap();
        recorder.close();

        assert!(!recorder.failed());

        let calls = state.calls.lock().unwrap();
        let written: Vec<&[u8]> = calls.packets.iter().map(|p| &p.data[..]).collect();
        assert_eq!(written, vec![&[0xaa][..], &[0xbb][..]]);
        assert!(calls.trailer);
    }

    #[test]
    fn test_trailer_failure_marks_failed() {
        let state = Arc::new(MockState {
            fail_trailer: true,
            ..Default::default()
        });
        let mut recorder = recorder_with_mock(&state);

        recorder.push(&config(&[0x67])).unwrap();
        recorder.push(&data(1000, &[0xaa])).unwrap();
        recorder.close();

        assert!(recorder.failed());
    }

    #[test]
    fn test_empty_recording_is_a_failure() {
        let state = Arc::new(MockState::default());
        let mut recorder = recorder_with_mock(&state);

        recorder.close();

        assert!(recorder.failed());
        assert!(!state.calls.lock().unwrap().trailer);
    }

    #[test]
    #[should_panic(expected = "after close")]
    fn test_push_after_close_panics() {
        let state = Arc::new(MockState::default());
        let mut recorder = recorder_with_mock(&state);

        recorder.close();
        let _ = recorder.push(&config(&[0x67]));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            RecordFormat::from_path(Path::new("out.mp4")),
            Some(RecordFormat::Mp4)
        );
        assert_eq!(
            RecordFormat::from_path(Path::new("out.mkv")),
            Some(RecordFormat::Matroska)
        );
        assert_eq!(RecordFormat::from_path(Path::new("out.avi")), None);
        assert_eq!(RecordFormat::from_path(Path::new("out")), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("mp4".parse(), Ok(RecordFormat::Mp4));
        assert_eq!("mkv".parse(), Ok(RecordFormat::Matroska));
        assert_eq!("matroska".parse(), Ok(RecordFormat::Matroska));
        assert!("avi".parse::<RecordFormat>().is_err());
    }
}
