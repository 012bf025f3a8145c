//! Per-camera decode worker
//!
//! One `StreamWorker` owns the long-running decode thread for one camera.
//! The thread opens the source, publishes stream properties, then loops:
//! decode one frame, store it in the single-slot latest-frame buffer, invoke
//! the registered callback synchronously. Callback latency therefore gates
//! decode throughput directly; consumers that cannot keep up must offload.
//!
//! Shutdown is cooperative (flag-checked between reads) with a bounded join:
//! a source stalled inside a read cannot hang the caller past the join
//! deadline — the thread is detached and cleaned up by the OS at process
//! exit instead.

use crate::source::StreamSource;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use storewatch_common::{CameraError, Frame, Result, StreamInfo};
use tracing::{error, info, warn};

/// Default deadline for `stop` to wait on the decode thread.
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a decode worker.
///
/// `Idle → Opening → Streaming → {Stopped | Failed}`. There is no automatic
/// reconnection: a `Stopped`/`Failed` worker stays down until its owner
/// decides to create a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Opening = 1,
    Streaming = 2,
    Stopped = 3,
    Failed = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Streaming,
            3 => Self::Stopped,
            4 => Self::Failed,
            _ => Self::Idle,
        }
    }

    /// Whether the decode thread is (or is about to be) delivering frames.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Opening | Self::Streaming)
    }
}

/// Callback invoked for every decoded frame, on the decode thread.
pub type FrameCallback = Arc<dyn Fn(&Frame) + Send + Sync + 'static>;

struct WorkerShared {
    state: AtomicU8,
    stop: AtomicBool,
    info: Mutex<StreamInfo>,
    latest: Mutex<Option<Frame>>,
}

/// Long-running decode worker for a single camera.
pub struct StreamWorker {
    label: String,
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    exit_rx: Mutex<Option<Receiver<()>>>,
    join_timeout: Duration,
}

impl StreamWorker {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            shared: Arc::new(WorkerShared {
                state: AtomicU8::new(WorkerState::Idle as u8),
                stop: AtomicBool::new(false),
                info: Mutex::new(StreamInfo::default()),
                latest: Mutex::new(None),
            }),
            handle: Mutex::new(None),
            exit_rx: Mutex::new(None),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Override the `stop` join deadline.
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Spawn the decode thread. Transitions `Idle → Opening`.
    ///
    /// # Errors
    ///
    /// Fails if the worker was already started or the thread cannot be
    /// spawned. Open failures of the source itself are reported through the
    /// worker state (`Failed`), not through this result.
    pub fn start(&self, source: Box<dyn StreamSource>, callback: FrameCallback) -> Result<()> {
        if self
            .shared
            .state
            .compare_exchange(
                WorkerState::Idle as u8,
                WorkerState::Opening as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(CameraError::SourceOpen(format!(
                "Worker {} already started",
                self.label
            )));
        }

        let (exit_tx, exit_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let label = self.label.clone();

        let handle = thread::Builder::new()
            .name(format!("decode-{}", self.label))
            .spawn(move || {
                // Dropped on every exit path (including panics), which
                // disconnects the channel and signals `stop`.
                let _exit_tx: Sender<()> = exit_tx;
                decode_loop(&label, source, &shared, callback.as_ref());
            })
            .map_err(|e| {
                self.shared
                    .state
                    .store(WorkerState::Failed as u8, Ordering::Release);
                CameraError::SourceOpen(format!("Failed to spawn decode thread: {e}"))
            })?;

        *self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        *self
            .exit_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(exit_rx);
        Ok(())
    }

    /// Request cooperative shutdown without waiting for the thread to exit.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Request cooperative shutdown and wait (bounded) for the decode
    /// thread to exit.
    ///
    /// If the thread does not exit within the join deadline — a source
    /// stalled inside a blocking read — it is detached with a warning and
    /// the state is forced to `Stopped` for observers.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let exit_rx = self
            .exit_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(handle) = handle else {
            return;
        };

        let exited = match exit_rx {
            Some(rx) => match rx.recv_timeout(self.join_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            },
            None => true,
        };

        if exited {
            if handle.join().is_err() {
                error!("Decode thread {} panicked", self.label);
                self.shared
                    .state
                    .store(WorkerState::Failed as u8, Ordering::Release);
            }
        } else {
            warn!(
                "Decode thread {} did not exit within {:?}, detaching",
                self.label, self.join_timeout
            );
            drop(handle);
        }

        // Observers must see a terminal state even while a stalled thread
        // is still unwinding in the background.
        if self.state().is_running() {
            self.shared
                .state
                .store(WorkerState::Stopped as u8, Ordering::Release);
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Whether the worker is currently delivering (or opening).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Stream properties; zeroes until the source has opened.
    #[must_use]
    pub fn stream_info(&self) -> StreamInfo {
        *self
            .shared
            .info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recent raw frame, or `None` if nothing was decoded yet.
    #[must_use]
    pub fn latest_frame(&self) -> Option<Frame> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn decode_loop(
    label: &str,
    mut source: Box<dyn StreamSource>,
    shared: &WorkerShared,
    callback: &(dyn Fn(&Frame) + Send + Sync),
) {
    match source.open() {
        Ok(stream_info) => {
            *shared
                .info
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = stream_info;
            shared
                .state
                .store(WorkerState::Streaming as u8, Ordering::Release);
            info!(
                "Stream {label} opened: {}x{} @ {:.1} fps",
                stream_info.width, stream_info.height, stream_info.fps
            );
        }
        Err(e) => {
            error!("Stream {label} failed to open: {e}");
            shared
                .state
                .store(WorkerState::Failed as u8, Ordering::Release);
            return;
        }
    }

    loop {
        if shared.stop.load(Ordering::Acquire) {
            shared
                .state
                .store(WorkerState::Stopped as u8, Ordering::Release);
            break;
        }

        match source.read() {
            Ok(Some(frame)) => {
                {
                    let mut latest = shared
                        .latest
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    *latest = Some(frame.clone());
                }
                callback(&frame);
            }
            Ok(None) => {
                info!("Stream {label} ended");
                shared
                    .state
                    .store(WorkerState::Stopped as u8, Ordering::Release);
                break;
            }
            Err(e) => {
                error!("Stream {label} decode error: {e}");
                shared
                    .state
                    .store(WorkerState::Failed as u8, Ordering::Release);
                break;
            }
        }
    }

    source.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SyntheticSource;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_finite_stream_delivers_all_frames_then_stops() {
        let worker = StreamWorker::new("test-finite");
        let delivered = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&delivered);

        let source = Box::new(SyntheticSource::new(16, 16).with_frame_limit(5));
        worker
            .start(
                source,
                Arc::new(move |frame: &Frame| {
                    assert!(frame.is_well_formed());
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            worker.state() == WorkerState::Stopped
        }));
        assert_eq!(delivered.load(Ordering::SeqCst), 5);
        assert!(!worker.is_running());

        let info = worker.stream_info();
        assert_eq!((info.width, info.height), (16, 16));
        assert!(worker.latest_frame().is_some());
    }

    #[test]
    fn test_open_failure_ends_in_failed_state() {
        let worker = StreamWorker::new("test-open-fail");
        let source = Box::new(SyntheticSource::new(16, 16).failing_open());
        worker.start(source, Arc::new(|_: &Frame| {})).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            worker.state() == WorkerState::Failed
        }));
        assert!(!worker.is_running());
        assert!(worker.latest_frame().is_none());
    }

    #[test]
    fn test_decode_error_ends_in_failed_state() {
        let worker = StreamWorker::new("test-decode-fail");
        let source = Box::new(SyntheticSource::new(16, 16).failing_after(2));
        worker.start(source, Arc::new(|_: &Frame| {})).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            worker.state() == WorkerState::Failed
        }));
        assert!(worker.latest_frame().is_some());
    }

    #[test]
    fn test_stop_interrupts_live_stream() {
        let worker = StreamWorker::new("test-stop");
        let source = Box::new(SyntheticSource::new(16, 16).with_fps(100.0).paced());
        worker.start(source, Arc::new(|_: &Frame| {})).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            worker.latest_frame().is_some()
        }));
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_stop_is_bounded_on_stalled_source() {
        let worker =
            StreamWorker::new("test-stalled").with_join_timeout(Duration::from_millis(200));
        let source = Box::new(
            SyntheticSource::new(16, 16).with_read_delay(Duration::from_secs(30)),
        );
        worker.start(source, Arc::new(|_: &Frame| {})).unwrap();

        // Give the thread time to enter the stalled read.
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        worker.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_double_start_is_rejected() {
        let worker = StreamWorker::new("test-double");
        let source = Box::new(SyntheticSource::new(16, 16).with_frame_limit(1));
        worker.start(source, Arc::new(|_: &Frame| {})).unwrap();

        let second = Box::new(SyntheticSource::new(16, 16));
        assert!(worker
            .start(second, Arc::new(|_: &Frame| {}))
            .is_err());
        worker.stop();
    }
}
