//! UDP datagram link
//!
//! Wraps a UDP socket configured through `socket2` (address reuse, broadcast,
//! read timeout) behind the `DatagramLink` trait used by the transport.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Connectionless, best-effort datagram service
///
/// Implementations must be shareable between the receive and transmit
/// threads.
pub trait DatagramLink: Send + Sync {
    /// Send one datagram, returning the number of bytes written
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError>;

    /// Wait for one datagram
    ///
    /// Returns `Ok(None)` when the read timeout elapses with nothing
    /// received.
    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError>;

    /// Address this link is bound to
    fn local_addr(&self) -> Result<SocketAddr, SocketError>;
}

/// UDP implementation of `DatagramLink`
#[derive(Debug)]
pub struct UdpLink {
    inner: UdpSocket,
}

impl UdpLink {
    /// Bind a blocking UDP socket with the given read timeout
    ///
    /// A `None` timeout blocks receives indefinitely.
    pub fn bind(addr: SocketAddr, read_timeout: Option<Duration>) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if addr.is_ipv4() {
            socket.set_broadcast(true)?;
        }
        socket.bind(&addr.into())?;

        let inner: UdpSocket = socket.into();
        inner.set_read_timeout(read_timeout.filter(|t| !t.is_zero()))?;

        let link = UdpLink { inner };
        tracing::debug!(local = ?link.local_addr().ok(), "UDP link bound");
        Ok(link)
    }

    /// Set the kernel send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        socket2::SockRef::from(&self.inner).set_send_buffer_size(size)?;
        Ok(())
    }

    /// Set the kernel receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        socket2::SockRef::from(&self.inner).set_recv_buffer_size(size)?;
        Ok(())
    }

    pub fn read_timeout(&self) -> Result<Option<Duration>, SocketError> {
        Ok(self.inner.read_timeout()?)
    }

    /// Try to clone the socket
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(UdpLink {
            inner: self.inner.try_clone()?,
        })
    }
}

impl DatagramLink for UdpLink {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, target)?)
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.inner.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            // Unix reports an elapsed read timeout as WouldBlock, Windows as TimedOut
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.inner.local_addr()?)
    }
}
