//! Per-connection and per-endpoint statistics.
//!
//! Connection counters are plain integers mutated under the connection lock;
//! [`crate::connection::Connection::stats`] hands out a snapshot.  Endpoint
//! counters are atomics because the receive loop bumps them before any
//! connection is looked up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Latency histogram
// ---------------------------------------------------------------------------

/// Upper bucket bounds for the enqueue→ack latency histogram, in
/// milliseconds.  A final overflow bucket catches everything above the last
/// bound.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [5, 10, 25, 50, 100, 250, 500, 1000];

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone, Default)]
pub struct LatencyHistogram {
    counts: [u64; LATENCY_BUCKETS_MS.len() + 1],
    count: u64,
    total: Duration,
}

impl LatencyHistogram {
    /// Record one latency observation.
    pub fn record(&mut self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let idx = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| ms < bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.counts[idx] += 1;
        self.count += 1;
        self.total += latency;
    }

    /// Number of observations recorded.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sum of all recorded latencies.
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Mean latency, or `None` before the first observation.
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count as u32)
    }

    /// Iterate `(upper_bound_ms, count)` pairs; the final pair uses
    /// `u64::MAX` as its bound.
    pub fn buckets(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        LATENCY_BUCKETS_MS
            .iter()
            .copied()
            .chain(std::iter::once(u64::MAX))
            .zip(self.counts.iter().copied())
    }
}

// ---------------------------------------------------------------------------
// Connection counters
// ---------------------------------------------------------------------------

/// Counters kept for one connection.
///
/// `srtt` and `rto` are stamped from the RTT estimator when a snapshot is
/// taken; the remaining fields are live counters.
#[derive(Debug, Clone, Default)]
pub struct ConnStats {
    /// Segments handed to the socket, including retransmissions.
    pub segments_sent: u64,
    /// Valid segments routed to this connection.
    pub segments_received: u64,
    /// Segments retransmitted by the Go-Back-N timer.
    pub retransmissions: u64,
    /// DATA segments that arrived ahead of `rcv_nxt` and were buffered.
    pub out_of_order: u64,
    /// Duplicate segments dropped.
    pub duplicates: u64,
    /// Segments beyond the receive window, dropped.
    pub out_of_window: u64,
    /// Wire bytes sent, headers included.
    pub bytes_sent: u64,
    /// Wire bytes received, headers included.
    pub bytes_received: u64,
    /// Application messages accepted by `send_msg`.
    pub messages_sent: u64,
    /// Application messages delivered in order.
    pub messages_delivered: u64,
    /// Smoothed RTT at snapshot time.
    pub srtt: Option<Duration>,
    /// Retransmission timeout at snapshot time.
    pub rto: Duration,
    /// Enqueue→ack latency per acknowledged message.
    pub latency: LatencyHistogram,
}

// ---------------------------------------------------------------------------
// Endpoint counters
// ---------------------------------------------------------------------------

/// Counters kept for the endpoint as a whole, bumped by the dispatcher.
#[derive(Debug, Default)]
pub struct EndpointStats {
    corrupt_dropped: AtomicU64,
    unknown_dropped: AtomicU64,
    protocol_violations: AtomicU64,
}

impl EndpointStats {
    pub(crate) fn note_corrupt(&self) {
        self.corrupt_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_unknown(&self) {
        self.unknown_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Datagrams dropped because the checksum or header failed validation.
    pub fn corrupt_dropped(&self) -> u64 {
        self.corrupt_dropped.load(Ordering::Relaxed)
    }

    /// Segments dropped because no connection matched their conn_id.
    pub fn unknown_dropped(&self) -> u64 {
        self.unknown_dropped.load(Ordering::Relaxed)
    }

    /// Malformed handshakes and other protocol violations dropped.
    pub fn protocol_violations(&self) -> u64 {
        self.protocol_violations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_places_observations() {
        let mut h = LatencyHistogram::default();
        h.record(Duration::from_millis(3));
        h.record(Duration::from_millis(7));
        h.record(Duration::from_millis(7));
        h.record(Duration::from_secs(5));

        let buckets: Vec<_> = h.buckets().collect();
        assert_eq!(buckets[0], (5, 1));
        assert_eq!(buckets[1], (10, 2));
        assert_eq!(buckets[8], (u64::MAX, 1));
        assert_eq!(h.count(), 4);
    }

    #[test]
    fn histogram_mean() {
        let mut h = LatencyHistogram::default();
        assert_eq!(h.mean(), None);
        h.record(Duration::from_millis(10));
        h.record(Duration::from_millis(30));
        assert_eq!(h.mean(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn endpoint_counters_accumulate() {
        let s = EndpointStats::default();
        s.note_corrupt();
        s.note_corrupt();
        s.note_unknown();
        s.note_violation();
        assert_eq!(s.corrupt_dropped(), 2);
        assert_eq!(s.unknown_dropped(), 1);
        assert_eq!(s.protocol_violations(), 1);
    }
}
