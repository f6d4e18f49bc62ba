//! imgxfer - peer-to-peer video frame transfer over UDP
//!
//! Splits compressed frames into checksummed datagrams, reassembles them on
//! the far side with per-packet ACK/NACK and NACK-driven repair, and hands
//! completed frames to a decoder.
//!
//! ```no_run
//! use imgxfer::{ConnectionMode, PassthroughDecoder, NoopObserver, TransferConfig, Transport};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), imgxfer::TransferError> {
//! let transport = Transport::bind(
//!     TransferConfig::default(),
//!     Arc::new(PassthroughDecoder),
//!     Arc::new(NoopObserver),
//! )?;
//! transport.start(ConnectionMode::Host)?;
//! transport.send_frame(bytes::Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]))?;
//! transport.stop();
//! # Ok(())
//! # }
//! ```

pub use imgxfer_io as io;
pub use imgxfer_protocol as protocol;

pub mod config;
pub mod decode;
pub mod error;
pub mod observer;
pub mod transport;

pub use config::{TransferConfig, DEFAULT_PORT};
pub use decode::{DecodeError, DecodedFrame, FrameDecoder, PassthroughDecoder, PixelFormat};
pub use error::TransferError;
pub use observer::{NoopObserver, TransferObserver};
pub use transport::Transport;

// Re-export commonly used types
pub use io::{DatagramLink, MemoryLink, SocketError, UdpLink};
pub use protocol::{
    ConnectionMode, ConnectionState, LinkEvent, Packet, PacketType, StatsSnapshot, TransferStats,
};
