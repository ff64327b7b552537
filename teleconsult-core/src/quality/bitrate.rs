//! Outbound bitrate estimation for adaptation hints.
//!
//! Tracks cumulative byte counters from successive snapshots over a rolling
//! window and derives the current send rate. A smoothed RTT is kept
//! alongside for latency reporting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::quality::assess::QualityLevel;

/// Bitrate hints never go below this.
pub const MIN_HINT_BPS: u64 = 150_000;

/// Rolling-window bitrate estimator fed with cumulative counters.
pub struct BitrateEstimator {
    /// Samples: `(when, cumulative bytes sent)`.
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    /// Smoothed RTT in microseconds.
    smoothed_rtt_us: u64,
}

impl BitrateEstimator {
    /// Create an estimator with a 30-second rolling window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(30))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(16),
            window,
            smoothed_rtt_us: 0,
        }
    }

    /// Record the cumulative byte counter observed at `when`.
    ///
    /// A counter that goes backwards (sender restarted) resets the window.
    pub fn record_at(&mut self, when: Instant, cumulative_bytes: u64) {
        if let Some(&(_, last)) = self.samples.back() {
            if cumulative_bytes < last {
                self.samples.clear();
            }
        }
        self.samples.push_back((when, cumulative_bytes));
        self.evict(when);
    }

    /// Update the smoothed RTT (exponential moving average, α = 0.125).
    pub fn record_rtt(&mut self, rtt: Duration) {
        let rtt_us = rtt.as_micros() as u64;
        if self.smoothed_rtt_us == 0 {
            self.smoothed_rtt_us = rtt_us;
        } else {
            self.smoothed_rtt_us = self.smoothed_rtt_us * 7 / 8 + rtt_us / 8;
        }
    }

    /// Estimated send rate in bits/second, `None` until two samples exist.
    pub fn estimate_bps(&self) -> Option<u64> {
        let (&(t0, b0), &(t1, b1)) = (self.samples.front()?, self.samples.back()?);
        let elapsed = t1.duration_since(t0);
        if elapsed.is_zero() {
            return None;
        }
        let bits = (b1 - b0) as f64 * 8.0;
        Some((bits / elapsed.as_secs_f64()) as u64)
    }

    /// Smoothed round-trip time, or `Duration::ZERO` if not yet measured.
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.smoothed_rtt_us)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Suggested maximum video bitrate for the given video quality.
    ///
    /// `Excellent`/`Good`/`Unknown` leave the bitrate alone.
    pub fn hint(&self, video: QualityLevel) -> Option<u64> {
        let factor = match video {
            QualityLevel::Fair => 0.7,
            QualityLevel::Poor => 0.5,
            _ => return None,
        };
        let current = self.estimate_bps()?;
        Some(((current as f64 * factor) as u64).max(MIN_HINT_BPS))
    }

    // ── Internal ─────────────────────────────────────────────────

    fn evict(&mut self, now: Instant) {
        // Always keep at least two samples so a rate can be derived.
        while self.samples.len() > 2 {
            match self.samples.front() {
                Some(&(ts, _)) if now.duration_since(ts) > self.window => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
    }
}

impl Default for BitrateEstimator {
    fn default() -> Self {
        Self::new()
    }
}
