//! In-process datagram link
//!
//! A connected pair of endpoints over bounded `crossbeam` channels. An
//! optional outbound filter can drop or rewrite datagrams to simulate a
//! lossy radio link.

use crate::socket::{DatagramLink, SocketError};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;

/// Outbound datagram hook: may rewrite the bytes; returning `false` drops it
pub type PacketFilter = Box<dyn FnMut(&mut Vec<u8>) -> bool + Send>;

type Datagram = (Vec<u8>, SocketAddr);

/// One end of an in-memory link
pub struct MemoryLink {
    addr: SocketAddr,
    peer: SocketAddr,
    tx: Sender<Datagram>,
    rx: Receiver<Datagram>,
    read_timeout: Duration,
    filter: Mutex<Option<PacketFilter>>,
}

impl MemoryLink {
    /// Create two linked endpoints with the given addresses
    ///
    /// Each direction buffers up to `capacity` datagrams; further sends are
    /// dropped like an overrun socket buffer.
    pub fn pair(
        a: SocketAddr,
        b: SocketAddr,
        capacity: usize,
        read_timeout: Duration,
    ) -> (MemoryLink, MemoryLink) {
        let (a_tx, b_rx) = channel::bounded(capacity);
        let (b_tx, a_rx) = channel::bounded(capacity);

        let end = |addr, peer, tx, rx| MemoryLink {
            addr,
            peer,
            tx,
            rx,
            read_timeout,
            filter: Mutex::new(None),
        };
        (end(a, b, a_tx, a_rx), end(b, a, b_tx, b_rx))
    }

    /// Install a filter applied to every datagram this end sends
    pub fn set_outbound_filter(&self, filter: PacketFilter) {
        *self.filter.lock() = Some(filter);
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl DatagramLink for MemoryLink {
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        if target != self.peer {
            tracing::trace!(%target, "No such peer, datagram dropped");
            return Ok(buf.len());
        }

        let mut datagram = buf.to_vec();
        if let Some(filter) = self.filter.lock().as_mut() {
            if !filter(&mut datagram) {
                tracing::trace!(len = buf.len(), "Datagram dropped by filter");
                return Ok(buf.len());
            }
        }

        match self.tx.try_send((datagram, self.addr)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::trace!("Peer queue full, datagram dropped"),
            Err(TrySendError::Disconnected(_)) => tracing::trace!("Peer gone, datagram dropped"),
        }
        Ok(buf.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.rx.recv_timeout(self.read_timeout) {
            Ok((datagram, from)) => {
                // Oversized datagrams are truncated, as with a UDP socket
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(Some((n, from)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(self.read_timeout);
                Ok(None)
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        Ok(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (MemoryLink, MemoryLink) {
        MemoryLink::pair(
            "10.0.0.1:6789".parse().unwrap(),
            "10.0.0.2:6789".parse().unwrap(),
            16,
            Duration::from_millis(20),
        )
    }

    #[test]
    fn test_pair_delivers_both_ways() {
        let (a, b) = pair();
        let mut buf = [0u8; 16];

        a.send_to(b"ping", b.local_addr().unwrap()).unwrap();
        let (n, from) = b.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());

        b.send_to(b"pong", from).unwrap();
        let (n, _) = a.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_timeout_returns_none() {
        let (a, _b) = pair();
        let mut buf = [0u8; 16];
        assert!(a.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_filter_drops_and_rewrites() {
        let (a, b) = pair();
        let mut seen = 0;
        a.set_outbound_filter(Box::new(move |datagram: &mut Vec<u8>| {
            seen += 1;
            datagram[0] ^= 0xFF;
            seen != 1
        }));

        a.send_to(&[0x00], b.local_addr().unwrap()).unwrap();
        a.send_to(&[0x00], b.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 4];
        let (n, _) = b.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], &[0xFF]);
        assert!(b.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_unknown_target_is_dropped() {
        let (a, b) = pair();
        a.send_to(b"lost", "10.0.0.9:6789".parse().unwrap()).unwrap();
        let mut buf = [0u8; 16];
        assert!(b.recv_from(&mut buf).unwrap().is_none());
    }
}
