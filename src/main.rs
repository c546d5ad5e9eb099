use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{debug, info, warn};

use castview::utils::net::set_keep_alive;
use castview::{
    event_channel, Decoder, EventQueue, FrameListener, FrameSize, PacketSink, PipelineEvent,
    RecordFormat, Recorder, Stream, VideoBuffer,
};

#[derive(Parser, Debug)]
#[command(version, about = "Real-time H.264 stream player and recorder")]
struct Args {
    /// Caster address to connect to, e.g. 192.168.1.10:27183
    addr: SocketAddr,

    /// Record the stream to this file (.mp4 or .mkv)
    #[arg(short, long, value_name = "FILE")]
    record: Option<PathBuf>,

    /// Container format, inferred from the file extension when omitted
    #[arg(long, value_name = "mp4|mkv", value_parser = RecordFormat::from_str)]
    record_format: Option<RecordFormat>,

    /// Declared frame size of the incoming stream
    #[arg(long, default_value = "1920x1080", value_parser = FrameSize::from_str)]
    size: FrameSize,
}

/// Forwards buffer notifications onto the main event loop, which is the
/// frame consumer.
struct EventListener {
    events: EventQueue,
    skipped: AtomicU64,
}

impl FrameListener for EventListener {
    fn on_frame_available(&self) {
        self.events.post(PipelineEvent::NewFrame);
    }

    fn on_frame_skipped(&self) {
        let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
        if skipped % 100 == 0 {
            debug!("{skipped} frames skipped so far");
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let socket = TcpStream::connect(args.addr)
        .with_context(|| format!("Could not connect to caster at {}", args.addr))?;
    if let Err(err) = set_keep_alive(&socket) {
        warn!("Could not enable TCP keepalive: {err}");
    }
    info!("Connected to caster at {}", args.addr);

    let buffer = Arc::new(VideoBuffer::new());
    let (events, event_rx) = event_channel();
    buffer.set_listener(Box::new(EventListener {
        events: events.clone(),
        skipped: AtomicU64::new(0),
    }));

    let decoder = Decoder::new(Arc::clone(&buffer));
    let interrupter = decoder.interrupter();

    let mut sinks: Vec<Box<dyn PacketSink>> = vec![Box::new(decoder)];
    if let Some(path) = args.record {
        let format = match args.record_format.or_else(|| RecordFormat::from_path(&path)) {
            Some(format) => format,
            None => anyhow::bail!(
                "Cannot infer container format from {}, pass --record-format",
                path.display()
            ),
        };
        sinks.push(Box::new(Recorder::new(path, format, args.size)));
    }

    // A deliberate shutdown of the socket ends the blocking read; the
    // interrupt unblocks the display side.
    let ctrlc_socket = socket.try_clone().context("Could not clone socket")?;
    let ctrlc_interrupter = interrupter.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted, stopping stream");
        ctrlc_interrupter.cancel();
        let _ = ctrlc_socket.shutdown(Shutdown::Both);
    })
    .context("Could not set signal handler")?;

    let mut stream = Stream::start(socket, sinks, interrupter, events)?;

    let mut frames: u64 = 0;
    loop {
        match event_rx.recv() {
            Ok(PipelineEvent::NewFrame) => {
                let frame = buffer.take_frame();
                frames += 1;
                debug!(
                    "frame {} ({}x{}, pts {:?})",
                    frames, frame.width, frame.height, frame.pts
                );
            }
            Ok(PipelineEvent::StreamStopped) | Err(_) => break,
        }
    }

    stream.join();
    info!("Stream ended after {frames} frames");
    Ok(())
}
