//! Receive-side reordering and in-order delivery.
//!
//! [`Receiver`] implements the inbound half of the protocol:
//!
//! - A segment with `seq == rcv_nxt` is delivered immediately, then the
//!   reorder map is drained of contiguous successors.
//! - Segments ahead of `rcv_nxt` but inside the receive window are buffered;
//!   duplicates and out-of-window segments are dropped.
//! - After every DATA/FIN arrival the caller sends a **cumulative ACK**
//!   carrying [`ack_number`] = `rcv_nxt` and the current advertised window.
//!
//! A FIN consumes one sequence number and may arrive ahead of missing data,
//! in which case it is held back like any other gap until the data fills in.
//!
//! This module only manages state; socket I/O and ACK scheduling are the
//! caller's responsibility.
//!
//! [`ack_number`]: Receiver::ack_number

use std::collections::HashMap;

use crate::segment::seq_lt;

/// What became of one inbound DATA or FIN segment.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// The segment was in order; zero or more messages became deliverable,
    /// and `fin` reports whether the peer's FIN was consumed in the drain.
    Delivered { messages: Vec<Vec<u8>>, fin: bool },
    /// Ahead of `rcv_nxt` but inside the window; buffered for later.
    Buffered,
    /// Already seen; dropped.
    Duplicate,
    /// Beyond the receive window; dropped.
    OutOfWindow,
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct Receiver {
    /// Next sequence number expected in order (`RCV.NXT`).
    rcv_nxt: u32,
    /// Out-of-order payloads keyed by seq, all in `(rcv_nxt, rcv_nxt + cap)`.
    reorder: HashMap<u32, Vec<u8>>,
    /// Receive-window capacity, in segments.
    cap: u16,
    /// Sequence number of a FIN received ahead of missing data.
    pending_fin: Option<u32>,
}

impl Receiver {
    /// Create a receiver expecting `rcv_nxt` as the first in-order seq.
    ///
    /// After the handshake this is 1 on both sides: SYN and SYN|ACK each
    /// consume sequence number 0.
    pub fn new(rcv_nxt: u32, cap: u16) -> Self {
        Self {
            rcv_nxt,
            reorder: HashMap::new(),
            cap,
            pending_fin: None,
        }
    }

    /// Cumulative ACK value for outbound segments (`RCV.NXT`).
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }

    /// Advertised receive window: capacity minus buffered segments.
    pub fn window(&self) -> u16 {
        self.cap.saturating_sub(self.reorder.len() as u16)
    }

    /// Number of segments currently parked in the reorder map.
    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    /// Process an inbound DATA segment.
    pub fn on_data(&mut self, seq: u32, payload: Vec<u8>) -> RecvOutcome {
        let offset = seq.wrapping_sub(self.rcv_nxt);
        if seq_lt(seq, self.rcv_nxt) {
            return RecvOutcome::Duplicate;
        }
        if offset >= self.cap as u32 {
            return RecvOutcome::OutOfWindow;
        }

        if offset == 0 {
            let mut messages = vec![payload];
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            let fin = self.drain(&mut messages);
            return RecvOutcome::Delivered { messages, fin };
        }

        // Out of order inside the window: buffer unless already present.
        if self.reorder.contains_key(&seq) || self.pending_fin == Some(seq) {
            return RecvOutcome::Duplicate;
        }
        self.reorder.insert(seq, payload);
        RecvOutcome::Buffered
    }

    /// Process an inbound FIN occupying sequence number `seq`.
    pub fn on_fin(&mut self, seq: u32) -> RecvOutcome {
        let offset = seq.wrapping_sub(self.rcv_nxt);
        if seq_lt(seq, self.rcv_nxt) {
            return RecvOutcome::Duplicate;
        }
        if offset >= self.cap as u32 {
            return RecvOutcome::OutOfWindow;
        }

        if offset == 0 {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            self.pending_fin = None;
            return RecvOutcome::Delivered {
                messages: Vec::new(),
                fin: true,
            };
        }

        if self.pending_fin == Some(seq) {
            return RecvOutcome::Duplicate;
        }
        self.pending_fin = Some(seq);
        RecvOutcome::Buffered
    }

    /// Pull contiguous segments out of the reorder map, advancing `rcv_nxt`
    /// past each.  Returns `true` when the drain reached a pending FIN.
    fn drain(&mut self, messages: &mut Vec<Vec<u8>>) -> bool {
        loop {
            if let Some(payload) = self.reorder.remove(&self.rcv_nxt) {
                messages.push(payload);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                continue;
            }
            if self.pending_fin == Some(self.rcv_nxt) {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                self.pending_fin = None;
                return true;
            }
            return false;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
