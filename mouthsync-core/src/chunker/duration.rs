//! Trustworthy buffer durations from untrustworthy backend metadata.
//!
//! A declared duration is used as-is when it is present, non-zero and below
//! the sanity ceiling. Anything else is replaced by an estimate from the byte
//! count, assuming S16 mono at the reference sample rate.

use std::time::Duration;

use tracing::debug;

use crate::buffering::SAMPLE_WIDTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationEstimator {
    reference_sample_rate: u32,
    max_plausible: Duration,
}

impl DurationEstimator {
    pub fn new(reference_sample_rate: u32, max_plausible: Duration) -> Self {
        Self {
            reference_sample_rate: reference_sample_rate.max(1),
            max_plausible,
        }
    }

    /// Always returns a positive duration.
    pub fn estimate(&self, declared: Option<Duration>, size_bytes: usize) -> Duration {
        match declared {
            Some(d) if !d.is_zero() && d <= self.max_plausible => d,
            _ => {
                let estimated = self.from_size(size_bytes);
                debug!(
                    declared = ?declared,
                    size_bytes,
                    estimated_ns = estimated.as_nanos() as u64,
                    "declared duration unusable, estimating from size"
                );
                estimated
            }
        }
    }

    /// Duration of `size_bytes` of S16 mono at the reference rate; one sample
    /// period when the buffer cannot hold a single sample.
    pub fn from_size(&self, size_bytes: usize) -> Duration {
        let samples = (size_bytes / SAMPLE_WIDTH).max(1) as u128;
        let nanos = samples * 1_000_000_000 / u128::from(self.reference_sample_rate);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX).max(1))
    }

    pub fn is_plausible(&self, declared: Option<Duration>) -> bool {
        matches!(declared, Some(d) if !d.is_zero() && d <= self.max_plausible)
    }
}

impl Default for DurationEstimator {
    fn default() -> Self {
        Self::new(16_000, Duration::from_secs(10))
    }
}
