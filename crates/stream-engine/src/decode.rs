//! Incremental, stateful stream decoding.
//!
//! [`StreamDecoder`] owns the rolling byte window and the resynchronization
//! policy; the actual frame format lives behind [`FrameCodec`] (MP3 in
//! production, a synthetic block format in tests). Decode correctness
//! depends on byte-stream order only — chunk boundaries from the queue
//! carry no meaning here.

use std::time::Duration;

use crate::error::EngineError;

/// Stream format reported by a decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// One decoded frame: interleaved `i16` PCM plus its nominal duration.
#[derive(Clone, Debug)]
pub struct PcmFrame {
    pub pcm: Vec<i16>,
    pub format: FrameFormat,
    pub duration: Duration,
}

/// Outcome of one decode attempt.
#[derive(Debug)]
pub enum DecodeStep {
    Frame(PcmFrame),
    /// The window does not hold a complete frame yet.
    NeedMoreData,
}

/// A block-based compressed format the stream decoder can drive.
///
/// Implementations are pure per-frame codecs; windowing, sync search
/// bookkeeping, and the resync bound all live in [`StreamDecoder`].
pub trait FrameCodec: Send {
    /// Bytes needed to evaluate a frame header.
    fn header_len(&self) -> usize;

    /// Offset of the first plausible frame header in `window`, if any.
    fn find_sync(&self, window: &[u8]) -> Option<usize>;

    /// Total frame length for the header at `window[0]`, or `None` when the
    /// header is invalid. `window` holds at least [`Self::header_len`] bytes.
    fn frame_len(&self, window: &[u8]) -> Option<usize>;

    /// Decode one complete frame.
    fn decode_frame(&mut self, frame: &[u8]) -> Result<PcmFrame, EngineError>;

    /// Drop any internal decode state (bit reservoir etc.).
    fn reset(&mut self);
}

/// Rolling-window decoder with bounded resynchronization.
///
/// On a failed decode or sync loss the window advances one byte at a time;
/// after `resync_byte_limit` consecutive bad bytes the stream is declared
/// unrecoverable. A successful frame resets the bad-byte count, which is
/// what lets transient corruption (a dropped byte, a mangled header) pass
/// without aborting playback.
pub struct StreamDecoder {
    codec: Box<dyn FrameCodec>,
    window: Vec<u8>,
    pos: usize,
    bad_bytes: usize,
    resync_byte_limit: usize,
}

impl StreamDecoder {
    pub fn new(codec: Box<dyn FrameCodec>, resync_byte_limit: usize) -> Self {
        Self {
            codec,
            window: Vec::new(),
            pos: 0,
            bad_bytes: 0,
            resync_byte_limit,
        }
    }

    /// Append raw stream bytes to the window.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.window.extend_from_slice(bytes);
    }

    /// Unconsumed bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.window.len() - self.pos
    }

    /// Consecutive bad bytes skipped since the last good frame.
    pub fn bad_bytes(&self) -> usize {
        self.bad_bytes
    }

    /// Try to decode the next frame from the window.
    ///
    /// Returns `NeedMoreData` when the window cannot hold a complete frame;
    /// the caller tops the window up via [`StreamDecoder::extend`] and
    /// retries. Fatal loss of sync surfaces as [`EngineError::Decode`].
    pub fn decode_next(&mut self) -> Result<DecodeStep, EngineError> {
        let header_len = self.codec.header_len();

        loop {
            let avail = self.window.len() - self.pos;
            if avail < header_len {
                return Ok(DecodeStep::NeedMoreData);
            }

            let w = &self.window[self.pos..];
            match self.codec.find_sync(w) {
                None => {
                    // Nothing plausible in the window; keep only a header's
                    // worth of tail in case a sync word straddles the edge.
                    let skip = avail - (header_len - 1);
                    self.skip_bad(skip)?;
                    return Ok(DecodeStep::NeedMoreData);
                }
                Some(offset) if offset > 0 => {
                    self.skip_bad(offset)?;
                    continue;
                }
                Some(_) => {}
            }

            let w = &self.window[self.pos..];
            let frame_len = match self.codec.frame_len(w) {
                Some(len) => len,
                None => {
                    self.skip_bad(1)?;
                    continue;
                }
            };
            if w.len() < frame_len {
                return Ok(DecodeStep::NeedMoreData);
            }

            match self.codec.decode_frame(&w[..frame_len]) {
                Ok(frame) => {
                    self.pos += frame_len;
                    self.bad_bytes = 0;
                    return Ok(DecodeStep::Frame(frame));
                }
                Err(e) => {
                    tracing::debug!("frame decode failed, resyncing: {e}");
                    self.codec.reset();
                    self.skip_bad(1)?;
                }
            }
        }
    }

    fn skip_bad(&mut self, count: usize) -> Result<(), EngineError> {
        self.pos += count;
        self.bad_bytes += count;
        if self.bad_bytes > self.resync_byte_limit {
            return Err(EngineError::Decode(format!(
                "no valid frame within {} bytes, stream unrecoverable",
                self.resync_byte_limit
            )));
        }
        Ok(())
    }

    /// Drop the consumed prefix once it dominates the window.
    fn compact(&mut self) {
        if self.pos > 0 && self.pos >= self.window.len() / 2 {
            self.window.drain(..self.pos);
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{BlockCodec, block_frame};

    fn decoder(limit: usize) -> StreamDecoder {
        StreamDecoder::new(Box::new(BlockCodec::default()), limit)
    }

    fn decode_all(dec: &mut StreamDecoder) -> Vec<PcmFrame> {
        let mut frames = Vec::new();
        while let Ok(DecodeStep::Frame(f)) = dec.decode_next() {
            frames.push(f);
        }
        frames
    }

    #[test]
    fn decodes_frames_regardless_of_chunking() {
        let mut stream = Vec::new();
        for v in 0..3i16 {
            stream.extend_from_slice(&block_frame(&[v; 8], 1, 0));
        }

        // Feed in 3-byte slivers so every frame spans several extends.
        let mut dec = decoder(1024);
        let mut frames = Vec::new();
        for piece in stream.chunks(3) {
            dec.extend(piece);
            frames.extend(decode_all(&mut dec));
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].pcm, vec![0i16; 8]);
        assert_eq!(frames[2].pcm, vec![2i16; 8]);
    }

    #[test]
    fn single_corrupt_byte_is_resynced_past() {
        let mut stream = Vec::new();
        for v in 0..3i16 {
            stream.extend_from_slice(&block_frame(&[v; 8], 1, 0));
        }
        // Mangle the sync byte of the middle frame.
        let frame_len = block_frame(&[0i16; 8], 1, 0).len();
        stream[frame_len] ^= 0xFF;

        let mut dec = decoder(1024);
        dec.extend(&stream);
        let frames = decode_all(&mut dec);
        // Frame 1 is lost, frames 0 and 2 survive; no fatal error.
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pcm, vec![0i16; 8]);
        assert_eq!(frames[1].pcm, vec![2i16; 8]);
    }

    #[test]
    fn corruption_past_the_bound_is_fatal() {
        let mut dec = decoder(64);
        dec.extend(&vec![0u8; 256]);
        let mut result = dec.decode_next();
        while let Ok(DecodeStep::Frame(_)) = result {
            result = dec.decode_next();
        }
        match result {
            Err(EngineError::Decode(_)) => {}
            other => panic!("expected fatal decode error, got {other:?}"),
        }
    }

    #[test]
    fn good_frame_resets_the_resync_budget() {
        let frame = block_frame(&[1i16; 8], 1, 0);
        let mut dec = decoder(40);

        // Two rounds of sub-limit garbage, each followed by a valid frame.
        for _ in 0..2 {
            dec.extend(&[0u8; 32]);
            dec.extend(&frame);
            let frames = decode_all(&mut dec);
            assert_eq!(frames.len(), 1, "budget should reset after a frame");
        }
    }

    #[test]
    fn truncated_tail_reports_need_more_data() {
        let frame = block_frame(&[3i16; 8], 1, 0);
        let mut dec = decoder(1024);
        dec.extend(&frame[..frame.len() - 2]);
        assert!(matches!(dec.decode_next(), Ok(DecodeStep::NeedMoreData)));
        dec.extend(&frame[frame.len() - 2..]);
        assert!(matches!(dec.decode_next(), Ok(DecodeStep::Frame(_))));
    }

    #[test]
    fn frame_reports_format_and_duration() {
        let mut dec = decoder(1024);
        // 8 samples, 2 channels, rate index 0 (8 kHz): 4 frames = 500 us.
        dec.extend(&block_frame(&[0i16; 8], 2, 0));
        match dec.decode_next().unwrap() {
            DecodeStep::Frame(f) => {
                assert_eq!(
                    f.format,
                    FrameFormat {
                        sample_rate: 8_000,
                        channels: 2
                    }
                );
                assert_eq!(f.duration, Duration::from_micros(500));
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }
}
