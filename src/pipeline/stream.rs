//! Network stream receiver.
//!
//! The video stream arrives as raw H.264 packets without time
//! information, so the caster prefixes each one with a 12-byte meta
//! header:
//!
//! ```text
//! [. . . . . . . .|. . . .]. . . . . . . . . . . . . . . ...
//!  <-------------> <-----> <-----------------------------...
//!        PTS        packet        raw packet
//!       (64-bit)     size
//! ```
//!
//! PTS is big-endian microseconds with all-ones meaning unset (the
//! config packet at session start); size is a big-endian 32-bit payload
//! length, always non-zero. The worker thread deframes chunks, parses
//! them into complete access units and pushes each resulting packet to
//! every sink in declaration order.

use std::io::{self, Read};
use std::net::TcpStream;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use log::{debug, error};

use crate::decoder::AccessUnitParser;
use crate::error::StreamError;
use crate::events::{EventQueue, PipelineEvent};
use crate::pipeline::sink::PacketSink;
use crate::pipeline::types::{CodecId, Packet};
use crate::utils::SignalOfStop;

const HEADER_SIZE: usize = 12;

/// One deframed chunk: raw PTS field plus payload.
struct Chunk {
    pts: u64,
    payload: Bytes,
}

/// Handle to the stream worker thread.
pub struct Stream {
    worker: Option<JoinHandle<()>>,
    interrupter: SignalOfStop,
}

impl Stream {
    /// Spawn the worker. Every parsed packet is pushed to the sinks in
    /// the given order (decoder first, recorder second); `interrupter`
    /// is the decoder sink's interrupt capability.
    pub fn start(
        socket: TcpStream,
        sinks: Vec<Box<dyn PacketSink>>,
        interrupter: SignalOfStop,
        events: EventQueue,
    ) -> Result<Stream, StreamError> {
        debug!("Starting stream thread");

        let worker = thread::Builder::new()
            .name("stream".into())
            .spawn(move || run_stream(socket, sinks, events))
            .map_err(StreamError::Io)?;

        Ok(Stream {
            worker: Some(worker),
            interrupter,
        })
    }

    /// Request termination. Idempotent and callable from any thread;
    /// unblocks consumers waiting on the decoder side. The socket read
    /// itself ends when the peer closes the connection or the socket is
    /// shut down externally.
    pub fn stop(&self) {
        self.interrupter.cancel();
    }

    /// Block until the worker exits.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_stream(mut socket: TcpStream, mut sinks: Vec<Box<dyn PacketSink>>, events: EventQueue) {
    if open_sinks(&mut sinks) {
        match read_loop(&mut socket, &mut sinks) {
            Ok(()) => debug!("End of frames"),
            Err(err) => error!("Stream stopped on error: {err}"),
        }

        // close in reverse open order
        for sink in sinks.iter_mut().rev() {
            sink.close();
        }
    }

    events.post(PipelineEvent::StreamStopped);
}

fn open_sinks(sinks: &mut [Box<dyn PacketSink>]) -> bool {
    for i in 0..sinks.len() {
        if let Err(err) = sinks[i].open(CodecId::H264) {
            error!("Could not open {}: {err}", sinks[i].name());

            for sink in sinks[..i].iter_mut().rev() {
                sink.close();
            }
            return false;
        }
    }
    true
}

fn read_loop(
    reader: &mut impl Read,
    sinks: &mut [Box<dyn PacketSink>],
) -> Result<(), StreamError> {
    let mut parser = AccessUnitParser::new();

    loop {
        let Some(chunk) = recv_chunk(reader)? else {
            // end of stream
            return Ok(());
        };

        // The PTS sentinel is propagated verbatim; only the sinks give
        // it meaning (extradata for the recorder, skip for the decoder).
        let pts = Packet::pts_from_wire(chunk.pts);

        for unit in parser.parse(chunk.payload) {
            let packet = Packet::new(unit.data, pts, unit.key_frame);

            for sink in sinks.iter_mut() {
                if let Err(err) = sink.push(&packet) {
                    error!("Could not process packet in {}: {err}", sink.name());
                    return Err(err.into());
                }
            }
        }
    }
}

/// Receive one framed chunk. `Ok(None)` means the peer ended the stream,
/// including mid-chunk truncation on disconnect.
fn recv_chunk(reader: &mut impl Read) -> Result<Option<Chunk>, StreamError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let pts = u64::from_be_bytes(header[..8].try_into().unwrap());
    let len = u32::from_be_bytes(header[8..].try_into().unwrap()) as usize;
    if len == 0 {
        return Err(StreamError::EmptyChunk);
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    Ok(Some(Chunk {
        pts,
        payload: payload.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RecordError, SinkError};
    use crate::events::event_channel;
    use std::io::{Cursor, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    fn chunk_bytes(pts: u64, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&pts.to_be_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_recv_chunk_framing() {
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xe8, // pts = 1000
            0x00, 0x00, 0x00, 0x02, // len = 2
            0xde, 0xad,
        ];
        let chunk = recv_chunk(&mut Cursor::new(&bytes)).unwrap().unwrap();
        assert_eq!(Packet::pts_from_wire(chunk.pts), Some(1000));
        assert_eq!(&chunk.payload[..], &[0xde, 0xad]);
    }

    #[test]
    fn test_recv_chunk_config_sentinel() {
        let bytes = [
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // pts unset
            0x00, 0x00, 0x00, 0x01, // len = 1
            0x67,
        ];
        let chunk = recv_chunk(&mut Cursor::new(&bytes)).unwrap().unwrap();
        assert_eq!(Packet::pts_from_wire(chunk.pts), None);
        assert_eq!(&chunk.payload[..], &[0x67]);
    }

    #[test]
    fn test_recv_chunk_end_of_stream() {
        assert!(recv_chunk(&mut Cursor::new(&[])).unwrap().is_none());

        // header truncated mid-way by a disconnect
        let partial = [0u8; 5];
        assert!(recv_chunk(&mut Cursor::new(&partial)).unwrap().is_none());

        // payload truncated mid-way
        let mut bytes = chunk_bytes(1000, &[0xde, 0xad]);
        bytes.pop();
        assert!(recv_chunk(&mut Cursor::new(&bytes)).unwrap().is_none());
    }

    #[test]
    fn test_recv_chunk_rejects_empty_payload() {
        let bytes = chunk_bytes(1000, &[]);
        assert!(matches!(
            recv_chunk(&mut Cursor::new(&bytes)),
            Err(StreamError::EmptyChunk)
        ));
    }

    #[derive(Default)]
    struct SinkLog {
        opened: bool,
        closed: bool,
        packets: Vec<(Option<i64>, Vec<u8>)>,
    }

    struct CollectSink {
        name: &'static str,
        log: Arc<Mutex<SinkLog>>,
        fail_push: bool,
    }

    impl PacketSink for CollectSink {
        fn open(&mut self, _codec: CodecId) -> Result<(), SinkError> {
            self.log.lock().unwrap().opened = true;
            Ok(())
        }

        fn push(&mut self, packet: &Packet) -> Result<(), SinkError> {
            if self.fail_push {
                return Err(SinkError::Record(RecordError::Failed));
            }
            self.log
                .lock()
                .unwrap()
                .packets
                .push((packet.pts, packet.data.to_vec()));
            Ok(())
        }

        fn close(&mut self) {
            self.log.lock().unwrap().closed = true;
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn start_on_loopback(
        sinks: Vec<Box<dyn PacketSink>>,
        payload: Vec<u8>,
    ) -> (Stream, std::sync::mpsc::Receiver<PipelineEvent>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let mut peer = TcpStream::connect(addr).unwrap();
            peer.write_all(&payload).unwrap();
            // dropping the connection ends the stream
        });

        let (socket, _) = listener.accept().unwrap();
        let (events, rx) = event_channel();
        let stream = Stream::start(socket, sinks, SignalOfStop::new(), events).unwrap();
        (stream, rx)
    }

    #[test]
    fn test_worker_fans_out_and_posts_stopped() {
        let decoder_log = Arc::new(Mutex::new(SinkLog::default()));
        let recorder_log = Arc::new(Mutex::new(SinkLog::default()));

        let mut payload = chunk_bytes(u64::MAX, &[0x67, 0x42]);
        payload.extend(chunk_bytes(1000, &[0, 0, 0, 1, 0x65, 0xaa]));
        payload.extend(chunk_bytes(4000, &[0, 0, 0, 1, 0x41, 0xbb]));

        let sinks: Vec<Box<dyn PacketSink>> = vec![
            Box::new(CollectSink {
                name: "decoder",
                log: Arc::clone(&decoder_log),
                fail_push: false,
            }),
            Box::new(CollectSink {
                name: "recorder",
                log: Arc::clone(&recorder_log),
                fail_push: false,
            }),
        ];

        let (mut stream, rx) = start_on_loopback(sinks, payload);
        assert_eq!(rx.recv().unwrap(), PipelineEvent::StreamStopped);
        stream.join();

        for log in [&decoder_log, &recorder_log] {
            let log = log.lock().unwrap();
            assert!(log.opened);
            assert!(log.closed);
            assert_eq!(log.packets.len(), 3);
            assert_eq!(log.packets[0].0, None);
            assert_eq!(log.packets[1], (Some(1000), vec![0, 0, 0, 1, 0x65, 0xaa]));
            assert_eq!(log.packets[2], (Some(4000), vec![0, 0, 0, 1, 0x41, 0xbb]));
        }
    }

    #[test]
    fn test_sink_failure_terminates_worker() {
        let log = Arc::new(Mutex::new(SinkLog::default()));

        let mut payload = chunk_bytes(u64::MAX, &[0x67]);
        payload.extend(chunk_bytes(1000, &[0xaa]));
        payload.extend(chunk_bytes(2000, &[0xbb]));

        let sinks: Vec<Box<dyn PacketSink>> = vec![Box::new(CollectSink {
            name: "failing",
            log: Arc::clone(&log),
            fail_push: true,
        })];

        let (mut stream, rx) = start_on_loopback(sinks, payload);
        assert_eq!(rx.recv().unwrap(), PipelineEvent::StreamStopped);
        stream.join();

        let log = log.lock().unwrap();
        assert!(log.opened);
        assert!(log.closed);
        assert!(log.packets.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let sinks: Vec<Box<dyn PacketSink>> = vec![Box::new(CollectSink {
            name: "decoder",
            log: Arc::clone(&log),
            fail_push: false,
        })];

        let (mut stream, rx) = start_on_loopback(sinks, Vec::new());
        stream.stop();
        stream.stop();
        assert_eq!(rx.recv().unwrap(), PipelineEvent::StreamStopped);
        stream.join();
    }
}
