//! Streaming audio playback engine.
//!
//! Fetches a compressed audio stream over a pluggable [`transport::Transport`],
//! decodes it incrementally, buffers compressed bytes under backpressure, and
//! paces decoded PCM out to a pluggable [`sink::AudioSink`] in real time.
//!
//! ## Pipeline
//! 1. **Download**: a background thread reads the remote stream into pooled
//!    chunks and pushes them into a bounded byte queue.
//! 2. **Decode + playback**: the player thread drains the queue, recovers
//!    frame sync, decodes one frame at a time, and writes PCM to the sink.
//! 3. **Captions** (optional): a third thread polls the playback clock and
//!    emits caption-change events from a parsed caption track.
//!
//! All three threads are owned by [`controller::StreamController`], which
//! exposes the public start/stop/query surface and enforces idempotent,
//! race-free session sequencing.

pub mod clock;
pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod events;
pub mod lyrics;
pub mod mp3;
pub mod pool;
pub mod queue;
pub mod sink;
pub mod transport;

mod download;
mod player;

#[cfg(test)]
pub(crate) mod testutil;
