//! Deterministic network-fault model for testing.
//!
//! Real networks drop, reorder, and corrupt datagrams.  To exercise the
//! reliability machinery without depending on actual network conditions,
//! [`Faults`] intercepts the send path of a [`crate::socket::Socket`] and
//! applies a configurable fault model:
//!
//! | Fault             | Description                                        |
//! |-------------------|----------------------------------------------------|
//! | Random loss       | Drop any datagram with probability `loss_rate`.    |
//! | Targeted loss     | Drop the *first* transmission of chosen DATA seqs. |
//! | Corruption        | Flip one byte in every Nth DATA segment.           |
//! | Reordering        | Hold one DATA seq, release it after the next send. |
//! | Black hole        | Drop every DATA segment.                           |
//! | ACK withholding   | Drop pure ACK segments.                            |
//!
//! All randomness comes from a seeded [`StdRng`], so failures reproduce.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::segment::{flags, Segment, HEADER_LEN};

enum Action {
    Pass,
    Drop,
    Corrupt,
    Hold,
}

/// Fault model applied to outbound datagrams, one decision per send.
#[derive(Debug)]
pub struct Faults {
    loss_rate: f64,
    corrupt_every: Option<u64>,
    drop_first_tx: Vec<u32>,
    hold_seq: Option<u32>,
    blackhole_data: bool,
    drop_pure_acks: bool,
    rng: StdRng,
    /// Transmission counts per DATA seq, for first-transmission targeting.
    tx_counts: HashMap<u32, u32>,
    /// Running count of distinct DATA segments seen (first transmissions).
    data_seen: u64,
    /// Datagram held back for reordering.
    held: Option<Vec<u8>>,
}

impl Faults {
    /// A transparent pass-through model with a fixed RNG seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_every: None,
            drop_first_tx: Vec::new(),
            hold_seq: None,
            blackhole_data: false,
            drop_pure_acks: false,
            rng: StdRng::seed_from_u64(seed),
            tx_counts: HashMap::new(),
            data_seen: 0,
            held: None,
        }
    }

    /// Drop each datagram independently with probability `p`.
    pub fn loss(mut self, p: f64) -> Self {
        self.loss_rate = p;
        self
    }

    /// Flip one byte in every `n`th distinct DATA segment (first
    /// transmissions only; retransmissions pass clean).
    pub fn corrupt_every(mut self, n: u64) -> Self {
        self.corrupt_every = Some(n.max(1));
        self
    }

    /// Drop exactly the first transmission of the given DATA seqs.
    pub fn drop_first_tx(mut self, seqs: &[u32]) -> Self {
        self.drop_first_tx = seqs.to_vec();
        self
    }

    /// Hold the DATA segment with `seq` and release it after the next send.
    pub fn hold(mut self, seq: u32) -> Self {
        self.hold_seq = Some(seq);
        self
    }

    /// Drop every DATA segment.
    pub fn blackhole_data(mut self) -> Self {
        self.blackhole_data = true;
        self
    }

    /// Drop pure ACK segments (no SYN/FIN/DATA bits).
    pub fn drop_pure_acks(mut self) -> Self {
        self.drop_pure_acks = true;
        self
    }

    /// Decide the fate of one outbound datagram.
    ///
    /// Returns the datagrams to actually put on the wire now, which may be
    /// empty (dropped or held) or include a previously held datagram.
    pub(crate) fn process(&mut self, segment: &Segment, bytes: Vec<u8>) -> Vec<Vec<u8>> {
        let f = segment.header.flags;
        let is_data = f & flags::DATA != 0;
        let is_pure_ack = f == flags::ACK;
        let seq = segment.header.seq;

        let mut action = Action::Pass;

        if self.blackhole_data && is_data {
            action = Action::Drop;
        } else if self.drop_pure_acks && is_pure_ack {
            action = Action::Drop;
        } else if is_data {
            let count = self.tx_counts.entry(seq).or_insert(0);
            *count += 1;
            if *count == 1 {
                // First transmission of this seq: targeted faults apply here,
                // so retransmissions always go through clean and the
                // connection converges.
                self.data_seen += 1;
                if self.drop_first_tx.contains(&seq) {
                    action = Action::Drop;
                } else if self.hold_seq == Some(seq) && self.held.is_none() {
                    action = Action::Hold;
                } else if self
                    .corrupt_every
                    .is_some_and(|every| self.data_seen % every == 0)
                {
                    action = Action::Corrupt;
                }
            }
        }

        if matches!(action, Action::Pass) && self.loss_rate > 0.0 {
            if self.rng.random::<f64>() < self.loss_rate {
                action = Action::Drop;
            }
        }

        let mut out = Vec::new();
        match action {
            Action::Pass => out.push(bytes),
            Action::Drop => {}
            Action::Hold => self.held = Some(bytes),
            Action::Corrupt => {
                let mut corrupted = bytes;
                // Flip a payload byte when there is one, a header byte otherwise.
                let idx = if corrupted.len() > HEADER_LEN { HEADER_LEN } else { 6 };
                corrupted[idx] ^= 0x20;
                out.push(corrupted);
            }
        }

        // A held datagram rides out right behind the next one on the wire.
        if !out.is_empty() {
            if let Some(held) = self.held.take() {
                out.push(held);
            }
        }
        out
    }
}
