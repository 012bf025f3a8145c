//! Live stream acquisition for the camera pipeline
//!
//! A [`StreamSource`] supplies decoded RGB24 frames through a
//! library-specific open/read/close sequence; [`RtspSource`] implements it
//! on top of FFmpeg for RTSP cameras (and plain video files), and
//! [`SyntheticSource`] generates deterministic frames for camera-less
//! operation and tests. A [`StreamWorker`] owns the long-running decode
//! thread for one camera and delivers frames to a callback.

mod source;
mod worker;

pub use source::{
    rtsp_url_for_channel, RtspSource, RtspSourceFactory, SourceFactory, StreamSource,
    SyntheticSource,
};
pub use worker::{FrameCallback, StreamWorker, WorkerState};
