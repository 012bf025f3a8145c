//! Thread-safe camera session registry
//!
//! The [`CameraManager`] owns every active camera session: it spawns one
//! decode worker per channel, wires decoded frames into a throttled
//! detection path, aggregates per-session statistics, and serves annotated
//! snapshots. One coarse lock guards the channel→session map; it is held
//! only for lookup, insert, and remove — never across a blocking join or a
//! detector call.

mod session;
mod throttle;

pub use throttle::{ewma, ThrottleGate};

use session::{Session, SessionStats};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use storewatch_common::{CameraError, ChannelStats, Frame, Result};
use storewatch_detection::{Annotator, Detector};
use storewatch_stream::{FrameCallback, SourceFactory, StreamWorker};
use storewatch_taskpool::WorkerPool;
use tracing::{info, warn};

/// Where admitted frames run their detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Call the detector synchronously on the decode thread. Detector
    /// latency directly gates decode throughput.
    Inline,
    /// Submit the detection pass to a shared worker pool, decoupling decode
    /// throughput from detector latency. The throttle ceiling still holds:
    /// the inference instant is stamped at dispatch.
    Pool { workers: usize },
}

/// Registry configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Minimum interval between detector invocations per session
    pub throttle_window: Duration,
    /// Best-effort wait for the first frame during `start`
    pub first_frame_wait: Duration,
    /// Deadline for the decode-thread join during `stop`
    pub stop_join_timeout: Duration,
    /// Highest accepted channel number
    pub max_channels: u32,
    pub dispatch: DispatchMode,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            throttle_window: Duration::from_millis(200),
            first_frame_wait: Duration::from_secs(2),
            stop_join_timeout: Duration::from_secs(5),
            max_channels: 30,
            dispatch: DispatchMode::Inline,
        }
    }
}

/// Owns all active camera sessions.
pub struct CameraManager {
    sessions: Mutex<HashMap<u32, Arc<Session>>>,
    sources: Arc<dyn SourceFactory>,
    detector: Arc<dyn Detector>,
    annotator: Arc<Annotator>,
    pool: Option<Arc<WorkerPool>>,
    config: ManagerConfig,
}

impl CameraManager {
    /// Create a manager over the given source factory and detector.
    ///
    /// # Errors
    ///
    /// Fails only if `DispatchMode::Pool` worker threads cannot be spawned.
    pub fn new(
        sources: Arc<dyn SourceFactory>,
        detector: Arc<dyn Detector>,
        annotator: Arc<Annotator>,
        config: ManagerConfig,
    ) -> Result<Self> {
        let pool = match config.dispatch {
            DispatchMode::Inline => None,
            DispatchMode::Pool { workers } => {
                let pool = WorkerPool::new(workers.max(1))
                    .map_err(|e| CameraError::IoError(io::Error::other(e.to_string())))?;
                Some(Arc::new(pool))
            }
        };

        Ok(Self {
            sessions: Mutex::new(HashMap::new()),
            sources,
            detector,
            annotator,
            pool,
            config,
        })
    }

    /// Start a session for `channel` reading from `uri`.
    ///
    /// Waits a short bounded interval for the first frame so stats report
    /// real resolution/fps for prompt sources; a slow source may still read
    /// zeroes until it delivers.
    ///
    /// # Errors
    ///
    /// `InvalidChannel` for an out-of-range channel or empty URI,
    /// `AlreadyRunning` if the channel is registered (including a session
    /// still being torn down), `SourceOpen` if the decode thread cannot be
    /// spawned.
    pub fn start(&self, channel: u32, uri: &str) -> Result<()> {
        if channel == 0 || channel > self.config.max_channels {
            return Err(CameraError::InvalidChannel(format!(
                "channel must be 1..={}, got {channel}",
                self.config.max_channels
            )));
        }
        if uri.is_empty() {
            return Err(CameraError::InvalidChannel("empty source URI".to_string()));
        }

        let worker = Arc::new(
            StreamWorker::new(format!("camera-{channel}"))
                .with_join_timeout(self.config.stop_join_timeout),
        );
        let stats = Arc::new(SessionStats::new(self.config.throttle_window));
        let callback = self.build_intake(channel, Arc::clone(&stats));

        // Reserve the channel under the registry lock before any slow work.
        {
            let mut sessions = self.lock_sessions();
            if sessions.contains_key(&channel) {
                return Err(CameraError::AlreadyRunning(channel));
            }
            sessions.insert(
                channel,
                Arc::new(Session {
                    channel,
                    uri: uri.to_string(),
                    worker: Arc::clone(&worker),
                    stats,
                    stopping: AtomicBool::new(false),
                }),
            );
        }

        let source = self.sources.create(uri);
        if let Err(e) = worker.start(source, callback) {
            self.lock_sessions().remove(&channel);
            return Err(e);
        }
        info!("Started channel {channel} ({uri})");

        // Best-effort: the source may be slow, in which case stats simply
        // read zero resolution/fps until the first frame lands.
        let deadline = Instant::now() + self.config.first_frame_wait;
        while Instant::now() < deadline {
            if worker.latest_frame().is_some() || !worker.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }

        Ok(())
    }

    /// Stop the session for `channel` and remove it.
    ///
    /// Two-phase: the session is condemned under the registry lock, the
    /// (bounded) blocking join runs outside any lock, then the entry is
    /// removed. Operations on other channels are never stalled by the join.
    ///
    /// # Errors
    ///
    /// `NotFound` if the channel is absent or already being stopped.
    pub fn stop(&self, channel: u32) -> Result<()> {
        let session = {
            let sessions = self.lock_sessions();
            let Some(session) = sessions.get(&channel) else {
                return Err(CameraError::NotFound(channel));
            };
            if session.stopping.swap(true, Ordering::AcqRel) {
                // Another caller already owns this teardown.
                return Err(CameraError::NotFound(channel));
            }
            Arc::clone(session)
        };

        session.worker.stop();
        self.lock_sessions().remove(&channel);
        info!("Stopped channel {channel}");
        Ok(())
    }

    /// Encoded annotated snapshot, or `None` before the first detection
    /// pass (or for an unknown channel).
    #[must_use]
    pub fn snapshot(&self, channel: u32) -> Option<Vec<u8>> {
        let session = {
            let sessions = self.lock_sessions();
            sessions.get(&channel).map(Arc::clone)
        }?;
        session.stats.snapshot()
    }

    /// Point-in-time stats for one channel.
    #[must_use]
    pub fn stats(&self, channel: u32) -> Option<ChannelStats> {
        let sessions = self.lock_sessions();
        sessions.get(&channel).map(|s| s.stats_snapshot())
    }

    /// Point-in-time stats for every registered session, ordered by
    /// channel.
    #[must_use]
    pub fn all_stats(&self) -> Vec<ChannelStats> {
        let sessions = self.lock_sessions();
        let mut stats: Vec<ChannelStats> =
            sessions.values().map(|s| s.stats_snapshot()).collect();
        stats.sort_by_key(|s| s.channel);
        stats
    }

    /// Whether `channel` currently has a live decode worker.
    #[must_use]
    pub fn is_running(&self, channel: u32) -> bool {
        let sessions = self.lock_sessions();
        sessions
            .get(&channel)
            .is_some_and(|s| s.worker.is_running())
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Best-effort teardown: request stop on every worker without awaiting
    /// in-flight detector calls, then clear the registry.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.lock_sessions();
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &drained {
            session.stopping.store(true, Ordering::Release);
            session.worker.request_stop();
        }
        if !drained.is_empty() {
            info!("Camera manager shut down ({} sessions)", drained.len());
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the frame-intake callback bound to one session.
    ///
    /// Runs on the decode thread for every frame: counts it, consults the
    /// throttle gate, and dispatches admitted frames to the detector inline
    /// or through the pool.
    fn build_intake(&self, channel: u32, stats: Arc<SessionStats>) -> FrameCallback {
        let detector = Arc::clone(&self.detector);
        let annotator = Arc::clone(&self.annotator);
        let pool = self.pool.clone();

        Arc::new(move |frame: &Frame| {
            stats.count_frame();

            if !stats.admit(Instant::now()) {
                return;
            }

            match &pool {
                None => run_detection(channel, frame, &stats, detector.as_ref(), &annotator),
                Some(pool) => {
                    let frame = frame.clone();
                    let stats = Arc::clone(&stats);
                    let detector = Arc::clone(&detector);
                    let annotator = Arc::clone(&annotator);
                    let submitted = pool.submit(move || {
                        run_detection(channel, &frame, &stats, detector.as_ref(), &annotator);
                    });
                    if let Err(e) = submitted {
                        warn!("Channel {channel}: detection offload rejected: {e}");
                    }
                }
            }
        })
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One detection pass: infer, publish counts and latency, republish the
/// annotated snapshot. Failures are logged and skipped; the session stays
/// up.
fn run_detection(
    channel: u32,
    frame: &Frame,
    stats: &SessionStats,
    detector: &dyn Detector,
    annotator: &Annotator,
) {
    let inference = match detector.infer(frame) {
        Ok(inference) => inference,
        Err(e) => {
            warn!("Channel {channel}: detector error: {e}");
            return;
        }
    };

    stats.record_inference(&inference);

    match annotator.render(frame, &inference) {
        Ok(encoded) => stats.store_snapshot(encoded),
        Err(e) => warn!("Channel {channel}: snapshot render failed: {e}"),
    }
}
