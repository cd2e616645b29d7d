//! Monotonic millisecond clock feeding packet timestamps and timer math.

use std::time::Instant;

/// Milliseconds since the endpoint started, as a wrapping `u32`.
///
/// The value wraps roughly every 49.7 days; all consumers subtract with
/// `wrapping_sub`, so elapsed intervals stay correct across the wrap.
#[derive(Debug, Clone)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Current timestamp in wrapping milliseconds.
    pub fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
