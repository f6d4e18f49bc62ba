//! imgxfer-send - stream frame files to a peer
//!
//! Reads frame files (or directories of them) and offers them to the
//! transport at a fixed rate.

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use imgxfer::{ConnectionMode, LinkEvent, PassthroughDecoder, TransferError, Transport};
use imgxfer_cli::{display_compact_stats, display_summary, Config, LogObserver, Mode};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "imgxfer-send")]
#[command(about = "Send frame files over UDP", long_about = None)]
struct Args {
    /// Frame files or directories of frame files
    inputs: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Peer address (default: broadcast)
    #[arg(short, long)]
    peer: Option<SocketAddr>,

    /// Link role
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Frames per second
    #[arg(long)]
    fps: Option<f64>,

    /// Passes over the inputs (0 = forever)
    #[arg(long)]
    repeat: Option<u32>,

    /// Heartbeat interval in milliseconds
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    /// Statistics interval in seconds (0 = off)
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Expand directories into their files, sorted by name
fn collect_frames(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries = fs::read_dir(input)
                .with_context(|| format!("Failed to read directory '{}'", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file())
                .collect::<Vec<_>>();
            entries.sort();
            frames.extend(entries);
        } else {
            frames.push(input.clone());
        }
    }
    Ok(frames)
}

fn load_frame(path: &Path) -> anyhow::Result<Bytes> {
    let data = fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))?;
    Ok(Bytes::from(data))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    imgxfer_cli::init_logging(args.verbose);

    tracing::info!("imgxfer sender starting...");

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let mut sender = config.sender.take().unwrap_or_default();

    if let Some(bind) = args.bind {
        config.transfer.bind = bind;
    }
    if args.peer.is_some() {
        config.transfer.peer = args.peer;
    }
    if args.heartbeat_ms.is_some() {
        config.transfer.heartbeat_interval_ms = args.heartbeat_ms;
    }
    if let Some(mode) = args.mode {
        sender.mode = mode;
    }
    if let Some(fps) = args.fps {
        sender.fps = fps;
    }
    if let Some(repeat) = args.repeat {
        sender.repeat = repeat;
    }
    if let Some(stats) = args.stats {
        sender.stats_interval_secs = stats;
    }
    if !args.inputs.is_empty() {
        sender.inputs = args.inputs.clone();
    }
    config.sender = Some(sender.clone());
    config.validate()?;

    let frames = collect_frames(&sender.inputs)?;
    if frames.is_empty() {
        anyhow::bail!("No input frames (pass files or directories)");
    }
    tracing::info!("Loaded {} frame files", frames.len());

    let transport = Transport::bind(
        config.transfer.clone(),
        Arc::new(PassthroughDecoder),
        Arc::new(LogObserver),
    )?;
    let mode = ConnectionMode::from(sender.mode);
    transport.start(mode)?;

    // No radio driver here: the socket is usable as soon as it is bound
    match mode {
        ConnectionMode::Host => transport.handle_link_event(LinkEvent::HostStarted),
        ConnectionMode::Join => {
            transport.handle_link_event(LinkEvent::Joined(transport.destination()))
        }
    }
    tracing::info!(
        "Sending to {} at {:.1} fps",
        transport.destination(),
        sender.fps
    );

    let interval = sender.frame_interval();
    let stats_interval = sender.stats_interval();
    let mut last_stats = Instant::now();
    let mut next_frame = Instant::now();
    let mut offered = 0u64;
    let mut pass = 0u32;

    'passes: loop {
        for path in &frames {
            let frame = match load_frame(path) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    continue;
                }
            };

            match transport.send_frame(frame) {
                Ok(()) => offered += 1,
                Err(TransferError::QueueFull) => {}
                Err(e @ (TransferError::FrameTooLarge { .. } | TransferError::EmptyFrame)) => {
                    tracing::warn!(path = %path.display(), "Skipping frame: {}", e);
                }
                Err(e) => {
                    tracing::error!("Transport failed: {}", e);
                    break 'passes;
                }
            }

            if !stats_interval.is_zero() && last_stats.elapsed() >= stats_interval {
                display_compact_stats(&transport.stats(), transport.state());
                last_stats = Instant::now();
            }

            next_frame += interval;
            let now = Instant::now();
            if next_frame > now {
                thread::sleep(next_frame - now);
            } else {
                next_frame = now;
            }
        }

        pass += 1;
        if sender.repeat != 0 && pass >= sender.repeat {
            break;
        }
    }

    // Let the transmit queue drain
    let deadline = Instant::now() + Duration::from_secs(2);
    while transport.stats().counters.frames_sent < offered && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    transport.stop();
    display_summary(&transport.stats());
    Ok(())
}
