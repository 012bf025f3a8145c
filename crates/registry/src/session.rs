//! Per-camera session state

use crate::throttle::{ewma, ThrottleGate};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use storewatch_common::{ChannelStats, Inference};
use storewatch_stream::StreamWorker;

/// Inference timing state, touched only around gate checks and EWMA folds —
/// never held across the detector call.
struct InferenceTiming {
    gate: ThrottleGate,
    avg_ms: f64,
}

/// Counters and buffers for one camera session.
///
/// All fields are written by the session's own decode thread (or the pool
/// task it dispatched) and read by arbitrary caller threads, so everything
/// here is atomic or behind a short-lived lock.
pub(crate) struct SessionStats {
    total_frames: AtomicU64,
    staff_count: AtomicU32,
    customer_count: AtomicU32,
    timing: Mutex<InferenceTiming>,
    snapshot: Mutex<Option<Vec<u8>>>,
}

impl SessionStats {
    pub(crate) fn new(throttle_window: Duration) -> Self {
        Self {
            total_frames: AtomicU64::new(0),
            staff_count: AtomicU32::new(0),
            customer_count: AtomicU32::new(0),
            timing: Mutex::new(InferenceTiming {
                gate: ThrottleGate::new(throttle_window),
                avg_ms: 0.0,
            }),
            snapshot: Mutex::new(None),
        }
    }

    /// Count a decoded frame (every frame, throttled or not).
    pub(crate) fn count_frame(&self) {
        self.total_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Consult the throttle gate; `true` admits the frame for detection and
    /// stamps the inference instant.
    pub(crate) fn admit(&self, now: Instant) -> bool {
        self.timing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gate
            .admit(now)
    }

    /// Publish the outcome of one detection pass.
    pub(crate) fn record_inference(&self, inference: &Inference) {
        self.staff_count
            .store(inference.staff_count, Ordering::Relaxed);
        self.customer_count
            .store(inference.customer_count, Ordering::Relaxed);
        let mut timing = self.timing.lock().unwrap_or_else(PoisonError::into_inner);
        timing.avg_ms = ewma(timing.avg_ms, inference.elapsed_ms);
    }

    /// Replace the single-slot annotated snapshot.
    pub(crate) fn store_snapshot(&self, encoded: Vec<u8>) {
        *self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(encoded);
    }

    pub(crate) fn snapshot(&self) -> Option<Vec<u8>> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Relaxed)
    }

    fn avg_inference_ms(&self) -> f64 {
        self.timing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .avg_ms
    }
}

/// Runtime state bound to one active camera.
pub(crate) struct Session {
    pub(crate) channel: u32,
    pub(crate) uri: String,
    pub(crate) worker: Arc<StreamWorker>,
    pub(crate) stats: Arc<SessionStats>,
    /// Set under the registry lock by the `stop` that condemned this
    /// session; the blocking join then happens outside the lock.
    pub(crate) stopping: AtomicBool,
}

impl Session {
    /// Point-in-time stats copy; `is_running` and stream properties are
    /// re-derived live from the worker rather than cached.
    pub(crate) fn stats_snapshot(&self) -> ChannelStats {
        let info = self.worker.stream_info();
        ChannelStats {
            channel: self.channel,
            uri: self.uri.clone(),
            is_running: self.worker.is_running(),
            width: info.width,
            height: info.height,
            fps: info.fps,
            total_frames: self.stats.total_frames(),
            staff_count: self.stats.staff_count.load(Ordering::Relaxed),
            customer_count: self.stats.customer_count.load(Ordering::Relaxed),
            avg_inference_ms: self.stats.avg_inference_ms(),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_inference_updates_counts_and_ewma() {
        let stats = SessionStats::new(Duration::from_millis(200));
        stats.record_inference(&Inference {
            detections: vec![],
            staff_count: 2,
            customer_count: 5,
            elapsed_ms: 40.0,
        });

        assert_eq!(stats.staff_count.load(Ordering::Relaxed), 2);
        assert_eq!(stats.customer_count.load(Ordering::Relaxed), 5);
        assert_eq!(stats.avg_inference_ms(), 40.0);

        stats.record_inference(&Inference {
            detections: vec![],
            staff_count: 1,
            customer_count: 1,
            elapsed_ms: 10.0,
        });
        assert_eq!(stats.avg_inference_ms(), 0.9 * 40.0 + 0.1 * 10.0);
    }

    #[test]
    fn test_snapshot_slot_replaces() {
        let stats = SessionStats::new(Duration::from_millis(200));
        assert!(stats.snapshot().is_none());

        stats.store_snapshot(vec![1, 2, 3]);
        assert_eq!(stats.snapshot().unwrap(), vec![1, 2, 3]);

        stats.store_snapshot(vec![9]);
        assert_eq!(stats.snapshot().unwrap(), vec![9]);
    }
}
