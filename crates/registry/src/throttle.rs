//! Detection rate limiting and latency smoothing

use std::time::{Duration, Instant};

/// Minimum-interval gate between consecutive detector invocations.
///
/// The first offer is always admitted; afterwards an offer is admitted only
/// once the window has elapsed since the last admission. With the default
/// 200 ms window this caps detection at roughly 5 Hz per camera no matter
/// how fast frames arrive.
#[derive(Debug)]
pub struct ThrottleGate {
    window: Duration,
    last: Option<Instant>,
}

impl ThrottleGate {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Offer a frame observed at `now`; `true` admits it for detection and
    /// stamps the window.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Exponentially weighted moving average of inference latency.
///
/// The first sample seeds the average exactly; later samples fold in with a
/// 0.9/0.1 split.
#[must_use]
pub fn ewma(avg: f64, sample: f64) -> f64 {
    if avg == 0.0 {
        sample
    } else {
        0.9 * avg + 0.1 * sample
    }
}
