//! Configuration file support for the imgxfer tools

use clap::ValueEnum;
use imgxfer::{ConnectionMode, TransferConfig, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Link role selectable from the command line or config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Run the access point
    Host,
    /// Join a host's access point
    Join,
}

impl From<Mode> for ConnectionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Host => ConnectionMode::Host,
            Mode::Join => ConnectionMode::Join,
        }
    }
}

/// Sender configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderConfig {
    #[serde(default = "default_sender_mode")]
    pub mode: Mode,
    /// Frame files, or directories of frame files, sent in order
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    /// Frames per second to offer
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Passes over the inputs; 0 repeats forever
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Statistics interval in seconds; 0 disables
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_sender_mode() -> Mode {
    Mode::Host
}

fn default_fps() -> f64 {
    10.0
}

fn default_repeat() -> u32 {
    1
}

fn default_stats_interval() -> u64 {
    1
}

/// Receiver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default = "default_receiver_mode")]
    pub mode: Mode,
    /// Directory decoded frames are written to
    pub output: Option<PathBuf>,
    /// Statistics interval in seconds; 0 disables
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    /// Exit after this many seconds; 0 runs until killed
    #[serde(default)]
    pub duration_secs: u64,
}

fn default_receiver_mode() -> Mode {
    Mode::Join
}

/// Combined configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Transport settings shared by both tools
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Sender configuration
    pub sender: Option<SenderConfig>,
    /// Receiver configuration
    pub receiver: Option<ReceiverConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transfer
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if let Some(sender) = &self.sender {
            if !(sender.fps.is_finite() && sender.fps > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "sender fps must be positive, got {}",
                    sender.fps
                )));
            }
        }
        Ok(())
    }

    /// Create example sender configuration
    pub fn example_sender() -> Self {
        Config {
            transfer: TransferConfig {
                peer: Some(SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::new(192, 168, 4, 2)),
                    DEFAULT_PORT,
                )),
                heartbeat_interval_ms: Some(1000),
                ..Default::default()
            },
            sender: Some(SenderConfig {
                mode: Mode::Host,
                inputs: vec![PathBuf::from("frames")],
                fps: 15.0,
                repeat: 0,
                stats_interval_secs: 1,
            }),
            receiver: None,
        }
    }

    /// Create example receiver configuration
    pub fn example_receiver() -> Self {
        Config {
            transfer: TransferConfig::default(),
            sender: None,
            receiver: Some(ReceiverConfig {
                mode: Mode::Join,
                output: Some(PathBuf::from("received")),
                stats_interval_secs: 1,
                duration_secs: 0,
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl SenderConfig {
    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Target gap between frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            mode: default_sender_mode(),
            inputs: Vec::new(),
            fps: default_fps(),
            repeat: default_repeat(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl ReceiverConfig {
    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            mode: default_receiver_mode(),
            output: None,
            stats_interval_secs: default_stats_interval(),
            duration_secs: 0,
        }
    }
}
