//! imgxfer CLI Library
//!
//! Shared functionality for the imgxfer command-line tools.

pub mod config;
pub mod observer;
pub mod stats;

pub use config::{Config, ConfigError, Mode, ReceiverConfig, SenderConfig};
pub use observer::{FrameWriter, LogObserver};
pub use stats::{display_compact_stats, display_summary, format_bandwidth, format_bytes};

/// Install the tracing subscriber; `RUST_LOG` overrides the default level
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
