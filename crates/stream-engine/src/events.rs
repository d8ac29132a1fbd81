//! Engine-to-display notifications.
//!
//! Both callbacks are fire-and-forget: the engine never waits on them and
//! the display layer is allowed to drop spectrum frames. Implementations
//! that cannot take cross-thread calls should forward into a channel
//! drained by their own thread.

/// Callbacks invoked from the engine's worker threads.
pub trait EngineEvents: Send + Sync {
    /// The most recently decoded PCM frame, for spectrum visualization.
    ///
    /// Called once per decoded frame from the player thread. Skip-tolerant:
    /// consumers must not block here.
    fn on_spectrum_frame(&self, _pcm: &[i16]) {}

    /// The current caption line changed.
    ///
    /// Called at most once per caption-index change; re-polls at the same
    /// index do not re-fire.
    fn on_caption_changed(&self, _text: &str) {}
}

/// No-op event sink for callers that only want audio.
#[derive(Debug, Default)]
pub struct NoEvents;

impl EngineEvents for NoEvents {}
