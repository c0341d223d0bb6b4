//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::segment::Segment`] instead of raw bytes.  All protocol logic
//! lives elsewhere; this module owns only datagram I/O.
//!
//! Decode failures are handed back as data rather than errors so the
//! dispatcher can count and silently drop corrupt datagrams without losing
//! the sender address.  An optional [`Faults`] model can be attached to the
//! send path for deterministic loss/corruption/reorder testing.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::segment::{Segment, SegmentError};
use crate::sim::Faults;

/// Maximum UDP payload size (theoretical limit; real segments are far smaller).
const MAX_DATAGRAM: usize = 65_535;

/// An async, segment-oriented UDP socket.
///
/// All methods take `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (resolved after the OS assigns a port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    faults: Mutex<Option<Faults>>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            faults: Mutex::new(None),
        })
    }

    /// Attach or remove a fault model on the send path.
    pub async fn set_faults(&self, faults: Option<Faults>) {
        *self.faults.lock().await = faults;
    }

    /// Encode `segment` and send it as a single UDP datagram to `dest`.
    ///
    /// With a fault model attached the datagram may be dropped, corrupted,
    /// or held back and released after a later send.
    pub async fn send_segment(&self, segment: &Segment, dest: SocketAddr) -> io::Result<()> {
        let bytes = segment.encode();
        let frames = match self.faults.lock().await.as_mut() {
            Some(faults) => faults.process(segment, bytes),
            None => vec![bytes],
        };
        for frame in frames {
            self.inner.send_to(&frame, dest).await?;
        }
        Ok(())
    }

    /// Receive the next datagram and attempt to decode it.
    ///
    /// Returns the decode result together with the sender address; the
    /// caller decides what a failed decode means.
    pub async fn recv_segment(&self) -> io::Result<(Result<Segment, SegmentError>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        Ok((Segment::decode(&buf[..n]), addr))
    }
}
