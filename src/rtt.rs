//! Adaptive retransmission-timeout estimation.
//!
//! RTO is computed with Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! clamped to the configured `[rto_min, rto_max]` band, and doubled on each
//! consecutive timeout (exponential back-off) up to the maximum.
//!
//! Karn's rule — never sample RTT from a retransmitted segment — is enforced
//! by the caller, which tracks per-segment retransmit counts.

use std::time::Duration;

use crate::config::Config;

/// Smoothed RTT / RTO state for one connection.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min: Duration,
    max: Duration,
}

impl RttEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: config.rto_initial,
            min: config.rto_min,
            max: config.rto_max,
        }
    }

    /// Record a new RTT sample and recompute SRTT / RTTVAR / RTO.
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn sample(&mut self, r: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(r);
                self.rttvar = r / 2;
            }
            Some(srtt) => {
                let diff = srtt.abs_diff(r);
                self.rttvar = self.rttvar * 3 / 4 + diff / 4;
                self.srtt = Some(srtt * 7 / 8 + r / 8);
            }
        }
        // srtt was just set above.
        let srtt = self.srtt.unwrap_or(r);
        self.rto = (srtt + self.rttvar * 4).clamp(self.min, self.max);
    }

    /// Double the RTO after a retransmission timeout, capped at `rto_max`.
    pub fn back_off(&mut self) {
        self.rto = (self.rto * 2).min(self.max);
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Current smoothed RTT estimate, if any sample has been taken.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RttEstimator {
        RttEstimator::new(&Config::default())
    }

    #[test]
    fn starts_at_initial_rto() {
        let rtt = estimator();
        assert_eq!(rtt.rto(), Duration::from_secs(1));
        assert_eq!(rtt.srtt(), None);
    }

    #[test]
    fn first_sample_seeds_srtt_and_rttvar() {
        let mut rtt = estimator();
        rtt.sample(Duration::from_millis(100));
        assert_eq!(rtt.srtt(), Some(Duration::from_millis(100)));
        // RTO = 100 + 4 * 50 = 300 ms.
        assert_eq!(rtt.rto(), Duration::from_millis(300));
    }

    #[test]
    fn recurrence_matches_rfc_weights() {
        let mut rtt = estimator();
        rtt.sample(Duration::from_millis(100));
        rtt.sample(Duration::from_millis(200));
        // rttvar = 3/4*50 + 1/4*|100-200| = 62.5 ms
        // srtt   = 7/8*100 + 1/8*200      = 112.5 ms
        // rto    = 112.5 + 4*62.5         = 362.5 ms
        assert_eq!(rtt.srtt(), Some(Duration::from_micros(112_500)));
        assert_eq!(rtt.rto(), Duration::from_micros(362_500));
    }

    #[test]
    fn rto_never_drops_below_minimum() {
        let mut rtt = estimator();
        rtt.sample(Duration::from_micros(50));
        assert_eq!(rtt.rto(), Duration::from_millis(200));
    }

    #[test]
    fn rto_never_exceeds_maximum() {
        let mut rtt = estimator();
        rtt.sample(Duration::from_secs(120));
        assert_eq!(rtt.rto(), Duration::from_secs(60));

        for _ in 0..10 {
            rtt.back_off();
        }
        assert_eq!(rtt.rto(), Duration::from_secs(60));
    }

    #[test]
    fn back_off_doubles_until_capped() {
        let mut rtt = estimator();
        rtt.back_off();
        assert_eq!(rtt.rto(), Duration::from_secs(2));
        rtt.back_off();
        assert_eq!(rtt.rto(), Duration::from_secs(4));
    }
}
