//! Shared monotonic clock
//!
//! Every producer (frame capture, input logging) stamps its records against
//! the same origin so the streams can be aligned by timestamp later. The
//! origin is set once and never reset while the handle is alive.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Cloneable handle to a process-wide monotonic origin
#[derive(Debug, Clone, Default)]
pub struct Clock {
    origin: Arc<OnceLock<Instant>>,
}

impl Clock {
    /// Create a clock whose origin is set lazily on first use
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the origin if it has not been set yet.
    /// Returns the origin in effect, which may be an earlier one.
    pub fn start(&self) -> Instant {
        *self.origin.get_or_init(Instant::now)
    }

    /// Nanoseconds elapsed since the origin
    pub fn now_ns(&self) -> u64 {
        let origin = self.start();
        origin.elapsed().as_nanos() as u64
    }

    /// Whether any producer has touched the clock yet
    pub fn is_started(&self) -> bool {
        self.origin.get().is_some()
    }
}
