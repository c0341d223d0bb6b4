//! Connection finite-state-machine types.
//!
//! The legal transitions live in [`crate::connection`]; this module only
//! defines the states so guard logic and logging stay cheap to add.
//!
//! ```text
//!  CLOSED ──connect──▶ SYN_SENT ──recv SYN|ACK──▶ ESTABLISHED
//!  CLOSED ──recv SYN──▶ SYN_RECEIVED ──recv ACK──▶ ESTABLISHED
//!  ESTABLISHED ──close / recv FIN──▶ CLOSING ──FINs acked──▶ CLOSED
//!  any ──abort──▶ CLOSED
//! ```

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live association; initial and terminal state.
    #[default]
    Closed,
    /// SYN sent; waiting for SYN|ACK.
    SynSent,
    /// SYN received and SYN|ACK sent; waiting for the final ACK.
    SynReceived,
    /// Handshake complete; data may flow.
    Established,
    /// A FIN has been sent; waiting for both FINs to be acknowledged.
    Closing,
}

impl ConnectionState {
    /// `true` once the three-way handshake has completed and data may flow.
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
