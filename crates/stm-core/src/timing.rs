//! Clocks and round-trip estimation.
//!
//! Packets carry a 16-bit millisecond stamp (wrapping every ~65
//! seconds) and echo the peer's most recent one back, so each round
//! trip yields an RTT sample for 4 bytes of overhead. The same
//! estimator also grades the terminal's echo latency: the connection
//! feeds it wire samples to pace sends, the prediction layer feeds it
//! confirmed-echo delays to size prediction TTLs.

use std::time::Instant;

/// Sentinel value indicating no timestamp reply available.
pub const TIMESTAMP_NONE: u16 = 0xFFFF;

/// Samples at or beyond this are artifacts, not round trips (a peer
/// suspended mid-session, a laptop lid closed).
const MAX_PLAUSIBLE_RTT_MS: f64 = 5000.0;

fn epoch() -> Instant {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Milliseconds since the process-local epoch. Monotonic.
pub fn timestamp() -> u64 {
    epoch().elapsed().as_millis() as u64
}

/// Current timestamp truncated to 16 bits for the wire.
pub fn timestamp16() -> u16 {
    timestamp() as u16
}

/// Timestamp difference handling wraparound.
#[inline]
pub fn timestamp_diff(now: u16, then: u16) -> u16 {
    now.wrapping_sub(then)
}

/// One smoothed round-trip estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttEstimate {
    /// Smoothed mean round trip (ms).
    pub smoothed: f64,
    /// Smoothed mean deviation (ms).
    pub deviation: f64,
}

impl RttEstimate {
    /// First sample: the mean is the sample, the deviation half of it.
    fn seeded(sample: f64) -> Self {
        Self {
            smoothed: sample,
            deviation: sample / 2.0,
        }
    }

    /// Fold in a later sample with gains of 1/8 (mean) and 1/4
    /// (deviation).
    fn blended(self, sample: f64) -> Self {
        Self {
            deviation: 0.75 * self.deviation + 0.25 * (self.smoothed - sample).abs(),
            smoothed: 0.875 * self.smoothed + 0.125 * sample,
        }
    }
}

/// Exponentially-weighted round-trip estimator.
#[derive(Debug, Clone, Default)]
pub struct RttEstimator {
    estimate: Option<RttEstimate>,
}

impl RttEstimator {
    /// An estimator that has seen nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one sample; implausible outliers are discarded.
    pub fn observe(&mut self, sample_ms: f64) {
        if !(0.0..MAX_PLAUSIBLE_RTT_MS).contains(&sample_ms) {
            return;
        }
        self.estimate = Some(match self.estimate {
            None => RttEstimate::seeded(sample_ms),
            Some(current) => current.blended(sample_ms),
        });
    }

    /// The current estimate, once a sample has landed.
    pub fn estimate(&self) -> Option<RttEstimate> {
        self.estimate
    }

    /// The current estimate, or `fallback` before the first sample.
    pub fn estimate_or(&self, fallback: RttEstimate) -> RttEstimate {
        self.estimate.unwrap_or(fallback)
    }
}
