//! Monotonic playback clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Elapsed playback time, advanced only as audio is handed to the sink.
///
/// Single writer (the player thread), multiple readers (captions, status
/// queries). Stored in microseconds internally so per-frame durations do
/// not accumulate rounding error; read out in milliseconds.
#[derive(Debug, Default)]
pub struct PlaybackClock {
    micros: AtomicU64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to zero at the start of a session.
    pub fn reset(&self) {
        self.micros.store(0, Ordering::Relaxed);
    }

    /// Advance by the nominal duration of audio just written.
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::Relaxed);
    }

    /// Current playback position in milliseconds.
    pub fn millis(&self) -> u64 {
        self.micros.load(Ordering::Relaxed) / 1000
    }
}
