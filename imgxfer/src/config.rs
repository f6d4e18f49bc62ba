//! Transfer runtime configuration

use crate::error::TransferError;
use imgxfer_protocol::{FrameLimits, HEADER_SIZE, MAX_DATAGRAM_SIZE, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default UDP port for frame transfer
pub const DEFAULT_PORT: u16 = 6789;

/// Settings for one transfer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Local address to bind
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Where frames are sent; falls back to the peer learned from the link,
    /// then to broadcast on the bind port
    #[serde(default)]
    pub peer: Option<SocketAddr>,
    /// Largest datagram put on the link, header included
    #[serde(default = "default_max_datagram")]
    pub max_datagram_size: usize,
    /// Largest frame accepted for sending or reassembly
    #[serde(default = "default_max_frame")]
    pub max_frame_size: usize,
    /// Frames waiting for the transmit thread
    #[serde(default = "default_tx_queue")]
    pub tx_queue_depth: usize,
    /// Completed frames waiting for the decoder
    #[serde(default = "default_decode_queue")]
    pub decode_queue_depth: usize,
    /// How long `send_frame` waits for room in the transmit queue
    #[serde(default = "default_enqueue_timeout")]
    pub enqueue_timeout_ms: u64,
    /// Socket read timeout; bounds how long `stop` waits for the receive thread
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_ms: u64,
    /// Pause between packets of one frame
    #[serde(default = "default_packet_pause")]
    pub packet_pause_us: u64,
    /// Partial frames untouched for this long are discarded; `None` or 0
    /// keeps them until superseded
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_ms: Option<u64>,
    /// Heartbeat period; `None` disables periodic heartbeats
    #[serde(default)]
    pub heartbeat_interval_ms: Option<u64>,
    /// Frames kept for NACK repair
    #[serde(default = "default_history_frames")]
    pub history_frames: usize,
    /// Resends allowed per packet
    #[serde(default = "default_max_retransmits")]
    pub max_retransmits: u32,
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT)
}

fn default_max_datagram() -> usize {
    MAX_DATAGRAM_SIZE
}

fn default_max_frame() -> usize {
    MAX_FRAME_SIZE
}

fn default_tx_queue() -> usize {
    10
}

fn default_decode_queue() -> usize {
    2
}

fn default_enqueue_timeout() -> u64 {
    50
}

fn default_recv_timeout() -> u64 {
    100
}

fn default_packet_pause() -> u64 {
    1000
}

fn default_stall_timeout() -> Option<u64> {
    Some(500)
}

fn default_history_frames() -> usize {
    4
}

fn default_max_retransmits() -> u32 {
    3
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            bind: default_bind(),
            peer: None,
            max_datagram_size: default_max_datagram(),
            max_frame_size: default_max_frame(),
            tx_queue_depth: default_tx_queue(),
            decode_queue_depth: default_decode_queue(),
            enqueue_timeout_ms: default_enqueue_timeout(),
            recv_timeout_ms: default_recv_timeout(),
            packet_pause_us: default_packet_pause(),
            stall_timeout_ms: default_stall_timeout(),
            heartbeat_interval_ms: None,
            history_frames: default_history_frames(),
            max_retransmits: default_max_retransmits(),
        }
    }
}

impl TransferConfig {
    /// Payload bytes per packet
    pub fn max_payload(&self) -> usize {
        self.max_datagram_size.saturating_sub(HEADER_SIZE)
    }

    pub fn limits(&self) -> FrameLimits {
        FrameLimits::new(self.max_payload(), self.max_frame_size)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn packet_pause(&self) -> Duration {
        Duration::from_micros(self.packet_pause_us)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Broadcast address on the bind port
    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.bind.port())
    }

    /// Reject settings the protocol cannot honour
    pub fn validate(&self) -> Result<(), TransferError> {
        let invalid = |msg: String| Err(TransferError::Config(msg));

        if self.max_datagram_size <= HEADER_SIZE {
            return invalid(format!(
                "max_datagram_size {} leaves no room for payload after the {}-byte header",
                self.max_datagram_size, HEADER_SIZE
            ));
        }
        if self.max_payload() > usize::from(u16::MAX) {
            return invalid(format!(
                "max_datagram_size {} exceeds the 16-bit payload length field",
                self.max_datagram_size
            ));
        }
        if self.max_frame_size == 0 || u32::try_from(self.max_frame_size).is_err() {
            return invalid(format!("max_frame_size {} out of range", self.max_frame_size));
        }
        let packets = self.limits().packets_for(self.max_frame_size);
        if packets > usize::from(u16::MAX) {
            return invalid(format!(
                "max_frame_size {} needs {} packets, more than a frame can carry",
                self.max_frame_size, packets
            ));
        }
        if self.tx_queue_depth == 0 || self.decode_queue_depth == 0 {
            return invalid("queue depths must be at least 1".to_string());
        }
        if self.recv_timeout_ms == 0 {
            return invalid("recv_timeout_ms must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.bind.port(), DEFAULT_PORT);
        assert_eq!(config.max_payload(), 1368);
        assert_eq!(config.max_frame_size, 200 * 1024);
        assert_eq!(config.stall_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.heartbeat_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TransferConfig = toml::from_str(
            r#"
            peer = "192.168.4.2:6789"
            max_datagram_size = 512
            stall_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.peer, Some("192.168.4.2:6789".parse().unwrap()));
        assert_eq!(config.max_payload(), 480);
        assert_eq!(config.stall_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.tx_queue_depth, 10);
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = TransferConfig {
            max_datagram_size: HEADER_SIZE,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TransferError::Config(_))));

        config.max_datagram_size = HEADER_SIZE + 1;
        config.max_frame_size = 100_000;
        assert!(matches!(config.validate(), Err(TransferError::Config(_))));

        let config = TransferConfig {
            decode_queue_depth: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broadcast_addr() {
        let config = TransferConfig::default();
        assert_eq!(
            config.broadcast_addr(),
            "255.255.255.255:6789".parse().unwrap()
        );
    }
}
