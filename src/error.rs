//! Transport-level error types.
//!
//! Recoverable wire events (loss, reorder, duplication, corruption) never
//! surface here — they are handled silently and counted.  These are the
//! errors an API consumer can actually observe.

/// Errors surfaced by the transport API.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The send window is full and the call was non-blocking.
    #[error("send window is full")]
    WouldBlock,

    /// A handshake or close exchange did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// A segment exceeded the retransmission limit; the connection is gone.
    #[error("connection aborted: retransmission limit exceeded")]
    ConnectionAborted,

    /// The connection is not in a state that allows the operation.
    #[error("connection is closed")]
    Closed,

    /// The message does not fit in a single segment.
    #[error("message of {len} bytes exceeds the {max}-byte payload limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// Underlying socket I/O failure.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(TransportError::WouldBlock.to_string(), "send window is full");
        assert_eq!(
            TransportError::PayloadTooLarge { len: 2000, max: 1200 }.to_string(),
            "message of 2000 bytes exceeds the 1200-byte payload limit"
        );
        assert_eq!(
            TransportError::ConnectionAborted.to_string(),
            "connection aborted: retransmission limit exceeded"
        );
    }
}
