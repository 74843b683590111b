use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::BufferConfig;

/// Smoothing factor applied to freshly observed instantaneous bitrate
/// samples, per spec §4.C: `B <- 0.7*B + 0.3*Binst`.
const SMOOTHING_OLD_WEIGHT: f64 = 0.7;
const SMOOTHING_NEW_WEIGHT: f64 = 0.3;
/// Observed deltas older than this are not used to update the estimate.
const MAX_SAMPLE_AGE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct LastRequest {
    at: Instant,
    byte_offset: u64,
}

/// Produces a best-effort bytes-per-second estimate, per spec §4.C.
///
/// The initial estimate comes from `file_length / estimated_duration`, the
/// latter a step function of file size (see [BufferConfig]). Subsequent
/// range-request deltas refine it via exponential smoothing, and an
/// optional container-probed duration can replace the initial guess
/// entirely once it is known.
#[derive(Debug)]
pub struct BitrateEstimator {
    file_length: u64,
    bytes_per_second: Mutex<f64>,
    last_request: Mutex<Option<LastRequest>>,
}

impl BitrateEstimator {
    /// Creates a new estimator seeded from the step-function duration
    /// heuristic in spec §3/§4.C.
    pub fn new(file_length: u64) -> Self {
        let estimated_duration = BufferConfig::estimated_duration_seconds(file_length).max(1);
        let initial = file_length as f64 / estimated_duration as f64;

        Self {
            file_length,
            bytes_per_second: Mutex::new(initial),
            last_request: Mutex::new(None),
        }
    }

    /// The current best-effort bytes-per-second estimate.
    pub fn bytes_per_second(&self) -> f64 {
        *self.bytes_per_second.lock().expect("estimator lock poisoned")
    }

    /// Replaces the estimate wholesale once a probed container duration is
    /// known, per spec §4.C.
    pub fn apply_probed_duration(&self, duration_seconds: u64) {
        if duration_seconds == 0 {
            return;
        }

        let mut bps = self.bytes_per_second.lock().expect("estimator lock poisoned");
        *bps = self.file_length as f64 / duration_seconds as f64;
    }

    /// Records a new HTTP range request's start byte, refining the estimate
    /// if the previous request is recent enough, per spec §4.C.
    pub fn observe_range_request(&self, byte_offset: u64, now: Instant) {
        let mut last_request = self.last_request.lock().expect("estimator lock poisoned");

        if let Some(previous) = last_request.as_ref() {
            let elapsed = now.saturating_duration_since(previous.at);
            let delta_bytes = byte_offset.abs_diff(previous.byte_offset);

            if elapsed < MAX_SAMPLE_AGE && elapsed.as_secs_f64() > 0.0 && delta_bytes > 0 {
                let instantaneous = delta_bytes as f64 / elapsed.as_secs_f64();
                let mut bps = self.bytes_per_second.lock().expect("estimator lock poisoned");
                *bps = SMOOTHING_OLD_WEIGHT * *bps + SMOOTHING_NEW_WEIGHT * instantaneous;
            }
        }

        *last_request = Some(LastRequest { at: now, byte_offset });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_seeds_initial_estimate() {
        let file_length = 512 * 1024 * 1024; // 512 MiB -> 1200s tier
        let estimator = BitrateEstimator::new(file_length);

        let expected = file_length as f64 / 1200.0;
        assert!((estimator.bytes_per_second() - expected).abs() < 1.0);
    }

    #[test]
    fn test_apply_probed_duration() {
        let estimator = BitrateEstimator::new(1_000_000_000);

        estimator.apply_probed_duration(1000);

        assert_eq!(1_000_000.0, estimator.bytes_per_second());
    }

    #[test]
    fn test_observe_range_request_smooths_estimate() {
        let estimator = BitrateEstimator::new(1_000_000_000);
        estimator.apply_probed_duration(1000); // 1,000,000 bytes/sec baseline
        let t0 = Instant::now();

        estimator.observe_range_request(0, t0);
        estimator.observe_range_request(2_000_000, t0 + Duration::from_secs(1));

        // instantaneous = 2,000,000 B/s; smoothed = 0.7*1,000,000 + 0.3*2,000,000
        assert_eq!(1_300_000.0, estimator.bytes_per_second());
    }

    #[test]
    fn test_observe_range_request_ignores_stale_sample() {
        let estimator = BitrateEstimator::new(1_000_000_000);
        estimator.apply_probed_duration(1000);
        let baseline = estimator.bytes_per_second();
        let t0 = Instant::now();

        estimator.observe_range_request(0, t0);
        estimator.observe_range_request(2_000_000, t0 + Duration::from_secs(10));

        assert_eq!(baseline, estimator.bytes_per_second());
    }
}
