//! Playback stage: drains the stream buffer, decodes, and paces PCM into
//! the sink.
//!
//! The sink's blocking writes are the engine's only pacing mechanism; the
//! loop never sleeps on its own. The playback clock advances by each
//! frame's nominal duration after the frame is handed to the sink, even
//! when a write fails, so caption timing stays aligned with the position
//! in the stream rather than with device health.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::clock::PlaybackClock;
use crate::config::EngineConfig;
use crate::decode::{DecodeStep, FrameFormat, PcmFrame, StreamDecoder};
use crate::error::EngineError;
use crate::events::EngineEvents;
use crate::mp3::CodecFactory;
use crate::queue::{ChunkQueue, CloseReason, PopResult};
use crate::sink::{AudioSink, SinkFactory};

/// Terminal outcome of a player run.
#[derive(Debug)]
pub(crate) enum PlayerExit {
    Complete,
    Cancelled,
    Failed(EngineError),
}

pub(crate) struct PlayerTask {
    pub(crate) queue: Arc<ChunkQueue>,
    pub(crate) sink_factory: Arc<dyn SinkFactory>,
    pub(crate) codec_factory: Arc<dyn CodecFactory>,
    pub(crate) clock: Arc<PlaybackClock>,
    pub(crate) events: Arc<dyn EngineEvents>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) playing: Arc<AtomicBool>,
    pub(crate) cfg: EngineConfig,
}

impl PlayerTask {
    /// Decode and play until the stream ends, fails, or is cancelled.
    pub(crate) fn run(self) -> PlayerExit {
        // The sink opens here so implementations may hold thread-bound
        // device handles.
        let mut sink = match self.sink_factory.open() {
            Ok(s) => s,
            Err(e) => {
                return PlayerExit::Failed(EngineError::Resource(format!("open sink: {e}")));
            }
        };

        let mut decoder =
            StreamDecoder::new(self.codec_factory.create(), self.cfg.resync_byte_limit);
        let mut format: Option<FrameFormat> = None;
        // Accumulate a prebuffer before the first decode attempt, then
        // refill at the low-water mark. Both thresholds are capped at what
        // the producer can buffer under the queue's byte cap; waiting for
        // more would leave both threads blocked on each other.
        let headroom = self
            .queue
            .capacity()
            .saturating_sub(self.cfg.chunk_bytes)
            .max(1);
        let mut min_bytes = self.cfg.min_start_bytes.min(headroom);

        loop {
            if self.cancel.load(Ordering::Acquire) {
                return PlayerExit::Cancelled;
            }

            match decoder.decode_next() {
                Ok(DecodeStep::Frame(frame)) => {
                    if let Err(e) = self.play_frame(&mut sink, &mut format, frame) {
                        return PlayerExit::Failed(e);
                    }
                    continue;
                }
                Ok(DecodeStep::NeedMoreData) => {}
                Err(e) => return PlayerExit::Failed(e),
            }

            match self.queue.pop(min_bytes) {
                PopResult::Data(chunks) => {
                    for chunk in &chunks {
                        decoder.extend(chunk.data());
                    }
                    min_bytes = self.cfg.decode_low_water.min(headroom);
                }
                PopResult::Closed(reason) => {
                    return self.drain_and_exit(&mut sink, &mut format, decoder, reason);
                }
            }
        }
    }

    /// Decode whatever the window still holds, then map the close reason.
    ///
    /// An incomplete trailing frame after a `Complete` close is normal
    /// stream truncation, not an error; a decode failure while draining a
    /// failed stream is subsumed by the original failure.
    fn drain_and_exit(
        &self,
        sink: &mut Box<dyn AudioSink>,
        format: &mut Option<FrameFormat>,
        mut decoder: StreamDecoder,
        reason: CloseReason,
    ) -> PlayerExit {
        loop {
            if self.cancel.load(Ordering::Acquire) {
                return PlayerExit::Cancelled;
            }
            match decoder.decode_next() {
                Ok(DecodeStep::Frame(frame)) => {
                    if let Err(e) = self.play_frame(sink, format, frame) {
                        return PlayerExit::Failed(e);
                    }
                }
                Ok(DecodeStep::NeedMoreData) | Err(_) => break,
            }
        }

        match reason {
            CloseReason::Complete => PlayerExit::Complete,
            CloseReason::Cancelled => PlayerExit::Cancelled,
            CloseReason::Failed(msg) => PlayerExit::Failed(EngineError::Network(msg)),
        }
    }

    /// Hand one frame to the sink and advance the clock.
    ///
    /// A failed write drops the rest of this frame's samples but is not
    /// fatal; a failed reconfigure is, since every later frame would be
    /// rendered under the wrong format.
    fn play_frame(
        &self,
        sink: &mut Box<dyn AudioSink>,
        format: &mut Option<FrameFormat>,
        frame: PcmFrame,
    ) -> Result<(), EngineError> {
        if *format != Some(frame.format) {
            tracing::debug!(
                "stream format: {} Hz, {} ch",
                frame.format.sample_rate,
                frame.format.channels
            );
            sink.reconfigure(frame.format.sample_rate, frame.format.channels)
                .map_err(|e| EngineError::Resource(format!("sink reconfigure: {e}")))?;
            *format = Some(frame.format);
            self.playing.store(true, Ordering::Release);
        }

        self.events.on_spectrum_frame(&frame.pcm);

        let mut offset = 0;
        while offset < frame.pcm.len() && !self.cancel.load(Ordering::Acquire) {
            let end = (offset + self.cfg.sink_burst_samples).min(frame.pcm.len());
            match sink.write(&frame.pcm[offset..end]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(e) => {
                    tracing::warn!("sink write failed, dropping {} samples: {e}", end - offset);
                    break;
                }
            }
        }

        self.clock.advance(frame.duration);
        Ok(())
    }
}
