//! Datagram I/O and timing for frame transfer
//!
//! The `DatagramLink` trait is the seam between the transport runtime and
//! the network. `UdpLink` implements it over a `socket2`-configured UDP
//! socket; `MemoryLink` is an in-process pair for tests and loopback use.

pub mod memory;
pub mod socket;
pub mod time;

pub use memory::{MemoryLink, PacketFilter};
pub use socket::{DatagramLink, SocketError, UdpLink};
pub use time::{Clock, Timer};
