use std::time::Duration;

pub const INITIAL_RTO: Duration = Duration::from_millis(1000);
pub const MIN_RTO: Duration = Duration::from_millis(100);
pub const MAX_RTO: Duration = Duration::from_millis(3000);
pub const RTT_ALPHA: f32 = 0.125;
pub const RTT_BETA: f32 = 0.25;
pub const RTT_K: u32 = 4;

/// An estimator for Round-Trip Time (RTT) and Retransmission Timeout (RTO).
///
/// Follows RFC 6298: Smoothed RTT (SRTT) and RTT variation (RTTVAR) feed
/// `RTO = SRTT + 4·RTTVAR`, clamped to [100 ms, 3 s]. Until the first sample
/// arrives the RTO sits at a conservative 1 s.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: INITIAL_RTO,
        }
    }

    pub fn update(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = self.rttvar.mul_f32(1.0 - RTT_BETA) + diff.mul_f32(RTT_BETA);
                self.srtt = Some(srtt.mul_f32(1.0 - RTT_ALPHA) + sample.mul_f32(RTT_ALPHA));
            }
        }
        let srtt = self.srtt.expect("set above");
        self.rto = (srtt + self.rttvar * RTT_K).clamp(MIN_RTO, MAX_RTO);
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_srtt_and_half_var() {
        let mut est = RttEstimator::new();
        est.update(Duration::from_millis(200));
        assert_eq!(est.srtt(), Some(Duration::from_millis(200)));
        // RTO = 200 + 4 * 100 = 600 ms
        assert_eq!(est.rto(), Duration::from_millis(600));
    }

    #[test]
    fn rto_clamped_low() {
        let mut est = RttEstimator::new();
        for _ in 0..32 {
            est.update(Duration::from_micros(100));
        }
        assert_eq!(est.rto(), MIN_RTO);
    }

    #[test]
    fn rto_clamped_high() {
        let mut est = RttEstimator::new();
        for _ in 0..8 {
            est.update(Duration::from_secs(10));
        }
        assert_eq!(est.rto(), MAX_RTO);
    }

    #[test]
    fn rto_stays_within_bounds_under_jitter() {
        let mut est = RttEstimator::new();
        let samples = [30u64, 500, 45, 900, 12, 2500, 80];
        for ms in samples {
            est.update(Duration::from_millis(ms));
            assert!(est.rto() >= MIN_RTO && est.rto() <= MAX_RTO);
        }
    }
}
