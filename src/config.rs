//! Tunable protocol parameters.
//!
//! One [`Config`] is handed to [`crate::endpoint::Endpoint::bind`] and shared
//! by every connection the endpoint creates.  The defaults match the protocol
//! constants; tests shrink the timeouts to keep loopback runs fast.

use std::time::Duration;

/// Upper bound on the delayed-ACK interval.  A longer delay could interact
/// badly with the minimum retransmission timeout, so it is clamped here.
pub const DELAYED_ACK_MAX: Duration = Duration::from_millis(50);

/// Protocol knobs recognised by an endpoint.
#[derive(Debug, Clone)]
pub struct Config {
    /// Effective cap on the send window, in segments.
    pub max_window: u16,
    /// Capacity of the receive-side reorder window, in segments.
    pub rcv_wnd_cap: u16,
    /// Retransmission timeout before any RTT sample is available.
    pub rto_initial: Duration,
    /// Lower bound on the computed RTO.
    pub rto_min: Duration,
    /// Upper bound on the RTO after repeated back-off.
    pub rto_max: Duration,
    /// Retransmissions allowed per segment before the connection is aborted.
    pub max_retries: u32,
    /// Largest application message accepted by `send_msg`, in bytes.
    pub max_payload: usize,
    /// Delayed-ACK interval; `Duration::ZERO` disables delayed ACKs.
    /// Values above [`DELAYED_ACK_MAX`] are clamped.
    pub delayed_ack: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_window: 10,
            rcv_wnd_cap: 10,
            rto_initial: Duration::from_secs(1),
            rto_min: Duration::from_millis(200),
            rto_max: Duration::from_secs(60),
            max_retries: 10,
            max_payload: 1200,
            delayed_ack: Duration::ZERO,
        }
    }
}

impl Config {
    /// Budget allowed for a handshake or close exchange to complete.
    ///
    /// This is the cumulative retransmission schedule the abort path walks
    /// through: one wait per allowed retry, starting at `rto_initial` and
    /// doubling per timeout up to `rto_max`, plus one more `rto_max` of
    /// slack so the per-segment retry limit always fires before this outer
    /// deadline does.
    pub(crate) fn exchange_budget(&self) -> Duration {
        let mut budget = Duration::ZERO;
        let mut rto = self.rto_initial.min(self.rto_max);
        for _ in 0..=self.max_retries {
            budget += rto;
            rto = (rto * 2).min(self.rto_max);
        }
        budget + self.rto_max
    }

    /// The delayed-ACK interval with the 50 ms bound applied.
    pub(crate) fn delayed_ack_clamped(&self) -> Duration {
        self.delayed_ack.min(DELAYED_ACK_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = Config::default();
        assert_eq!(c.max_window, 10);
        assert_eq!(c.rcv_wnd_cap, 10);
        assert_eq!(c.rto_initial, Duration::from_secs(1));
        assert_eq!(c.rto_min, Duration::from_millis(200));
        assert_eq!(c.rto_max, Duration::from_secs(60));
        assert_eq!(c.max_retries, 10);
        assert_eq!(c.max_payload, 1200);
        assert_eq!(c.delayed_ack, Duration::ZERO);
    }

    #[test]
    fn exchange_budget_covers_the_backoff_schedule() {
        let c = Config {
            rto_initial: Duration::from_millis(100),
            rto_max: Duration::from_secs(1),
            max_retries: 5,
            ..Config::default()
        };
        // Waits of 100 + 200 + 400 + 800 + 1000 + 1000 ms before the abort,
        // plus one rto_max of slack.
        assert_eq!(c.exchange_budget(), Duration::from_millis(4500));
    }

    #[test]
    fn delayed_ack_is_clamped() {
        let c = Config {
            delayed_ack: Duration::from_millis(500),
            ..Config::default()
        };
        assert_eq!(c.delayed_ack_clamped(), DELAYED_ACK_MAX);
    }
}
