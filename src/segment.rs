//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is one [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission,
//!   including the MD5 integrity checksum.
//! - Deserialising a raw byte slice back into a validated [`Segment`],
//!   returning errors for malformed, truncated, or corrupted input.
//!
//! No I/O happens here — this is pure data transformation.  Decoding never
//! touches connection state.

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 1 << 0;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 1 << 1;
    /// Finish — sender has no more data to send.
    pub const FIN: u8 = 1 << 2;
    /// Segment carries application payload.
    pub const DATA: u8 = 1 << 3;
}

/// Protocol version emitted and accepted by this implementation.
pub const VERSION: u8 = 1;

/// Fixed header size in bytes:
/// ver(1) + flags(1) + conn_id(4) + seq(4) + ack(4) + win(2) + len(2) + md5(16).
pub const HEADER_LEN: usize = 34;

/// Byte offset of the 16-byte checksum slot within the header.
const CHECKSUM_OFFSET: usize = 18;

// ---------------------------------------------------------------------------
// Sequence-space arithmetic
// ---------------------------------------------------------------------------

/// `true` when sequence number `a` is strictly after `b` in wrap-around space.
///
/// Comparisons use the signed 32-bit difference, valid as long as the two
/// values are less than `2^31` apart — windows are tiny compared to that.
#[inline]
pub(crate) fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b)) as i32 > 0
}

/// `true` when sequence number `a` is strictly before `b` in wrap-around space.
#[inline]
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    ((a.wrapping_sub(b)) as i32) < 0
}

// ---------------------------------------------------------------------------
// Header / Segment
// ---------------------------------------------------------------------------

/// Fixed-layout protocol header (big-endian on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Connection identifier chosen by the initiator; never zero.
    pub conn_id: u32,
    /// Sequence number of this segment, counted in segments.
    pub seq: u32,
    /// Cumulative acknowledgement: next seq expected from the peer.
    pub ack: u32,
    /// Advertised receive window, in segments.
    pub win: u16,
}

/// A complete protocol datagram: header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Build a segment from raw header fields.
    pub fn new(flags: u8, conn_id: u32, seq: u32, ack: u32, win: u16, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                flags,
                conn_id,
                seq,
                ack,
                win,
            },
            payload,
        }
    }

    /// Total size of this segment on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The checksum field holds the MD5 digest of the whole buffer computed
    /// with the 16-byte slot zeroed; the digest is swapped into place after
    /// hashing.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(VERSION);
        buf.push(self.header.flags);
        buf.extend_from_slice(&self.header.conn_id.to_be_bytes());
        buf.extend_from_slice(&self.header.seq.to_be_bytes());
        buf.extend_from_slice(&self.header.ack.to_be_bytes());
        buf.extend_from_slice(&self.header.win.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&self.payload);

        let digest = md5::compute(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 16].copy_from_slice(&digest.0);
        buf
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Verification recomputes the MD5 over the buffer with the checksum
    /// field substituted by zero bytes and compares it to the field value.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::TooShort(buf.len()));
        }
        if buf[0] != VERSION {
            return Err(SegmentError::BadVersion(buf[0]));
        }

        let len = u16::from_be_bytes([buf[16], buf[17]]) as usize;
        let actual = buf.len() - HEADER_LEN;
        if len != actual {
            return Err(SegmentError::LengthMismatch {
                declared: len,
                actual,
            });
        }

        let mut received = [0u8; 16];
        received.copy_from_slice(&buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 16]);

        let mut scratch = buf.to_vec();
        scratch[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 16].fill(0);
        if md5::compute(&scratch).0 != received {
            return Err(SegmentError::ChecksumMismatch);
        }

        Ok(Self {
            header: Header {
                flags: buf[1],
                conn_id: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
                seq: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
                ack: u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]),
                win: u16::from_be_bytes([buf[14], buf[15]]),
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram too short: need {HEADER_LEN} bytes, got {0}")]
    TooShort(usize),
    /// Unsupported protocol version.
    #[error("unsupported protocol version: {0}")]
    BadVersion(u8),
    /// `len` field does not match the actual trailing bytes.
    #[error("length field says {declared} payload bytes, datagram has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    /// Checksum did not match the recomputed value.
    #[error("checksum mismatch")]
    ChecksumMismatch,
}
