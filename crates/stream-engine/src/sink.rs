//! Audio output boundary.
//!
//! The physical output device lives behind [`AudioSink`]; the engine only
//! assumes blocking writes paced at the device's real-time rate. The sink is
//! opened on the player thread via [`SinkFactory`], so implementations are
//! free to hold thread-bound handles (CPAL streams are not `Send`).

use anyhow::Result;

/// A configured audio output accepting interleaved `i16` PCM.
pub trait AudioSink {
    /// Apply a new stream format. Called before the first write and again
    /// whenever the decoded format changes mid-stream; any samples written
    /// under the previous format have already been handed over.
    fn reconfigure(&mut self, sample_rate: u32, channels: u16) -> Result<()>;

    /// Write up to `pcm.len()` samples, returning how many were accepted.
    ///
    /// May block while the device drains earlier audio; this is what paces
    /// the player loop.
    fn write(&mut self, pcm: &[i16]) -> Result<usize>;
}

/// Opens one sink per playback session, on the player thread.
pub trait SinkFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioSink>>;
}
