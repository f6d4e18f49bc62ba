//! imgxfer-recv - receive frames from a peer
//!
//! Reassembles incoming frames and optionally writes each decoded frame to
//! a directory.

use clap::Parser;
use imgxfer::{ConnectionMode, LinkEvent, PassthroughDecoder, TransferObserver, Transport};
use imgxfer_cli::{display_compact_stats, display_summary, Config, FrameWriter, LogObserver, Mode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "imgxfer-recv")]
#[command(about = "Receive frames over UDP", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Host address reported when joining
    #[arg(long)]
    host: Option<SocketAddr>,

    /// Link role
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Directory to write decoded frames into
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Exit after this many seconds (0 = run until killed)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Statistics interval in seconds (0 = off)
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    imgxfer_cli::init_logging(args.verbose);

    tracing::info!("imgxfer receiver starting...");

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let mut receiver = config.receiver.take().unwrap_or_default();

    if let Some(bind) = args.bind {
        config.transfer.bind = bind;
    }
    if let Some(mode) = args.mode {
        receiver.mode = mode;
    }
    if args.output.is_some() {
        receiver.output = args.output.clone();
    }
    if let Some(duration) = args.duration {
        receiver.duration_secs = duration;
    }
    if let Some(stats) = args.stats {
        receiver.stats_interval_secs = stats;
    }
    config.validate()?;

    let observer: Arc<dyn TransferObserver> = match &receiver.output {
        Some(dir) => {
            tracing::info!("Writing frames to {}", dir.display());
            Arc::new(FrameWriter::new(dir)?)
        }
        None => Arc::new(LogObserver),
    };

    let transport = Transport::bind(config.transfer.clone(), Arc::new(PassthroughDecoder), observer)?;
    let mode = ConnectionMode::from(receiver.mode);
    transport.start(mode)?;
    tracing::info!("Listening on {}", transport.local_addr()?);

    match mode {
        ConnectionMode::Host => transport.handle_link_event(LinkEvent::HostStarted),
        ConnectionMode::Join => {
            let host = args.host.unwrap_or_else(|| transport.destination());
            transport.handle_link_event(LinkEvent::Joined(host));
        }
    }

    let started = Instant::now();
    let run_for = (receiver.duration_secs > 0).then(|| Duration::from_secs(receiver.duration_secs));
    let stats_interval = receiver.stats_interval();
    let mut last_stats = Instant::now();

    loop {
        thread::sleep(Duration::from_millis(100));

        if !stats_interval.is_zero() && last_stats.elapsed() >= stats_interval {
            display_compact_stats(&transport.stats(), transport.state());
            last_stats = Instant::now();
        }

        if run_for.map_or(false, |limit| started.elapsed() >= limit) {
            break;
        }
    }

    transport.stop();
    display_summary(&transport.stats());
    Ok(())
}
