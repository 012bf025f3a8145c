//! Generic task execution primitives for the camera pipeline
//!
//! Two building blocks live here:
//! - [`TaskQueue`]: an unbounded, non-blocking multi-producer/multi-consumer
//!   queue (Michael–Scott algorithm with epoch-based memory reclamation).
//! - [`WorkerPool`]: a fixed set of long-lived worker threads draining a
//!   `TaskQueue`, with submit-with-result semantics and blocking shutdown.
//!
//! The pool is deliberately decoupled from the camera domain: the registry
//! uses it to offload detection work off decode threads, and the same pool
//! can serve any other deferred-work need.

mod pool;
mod queue;

pub use pool::{PoolError, TaskHandle, WorkerPool};
pub use queue::TaskQueue;
