//! Shared test doubles.
//!
//! The synthetic "block" codec gives the decode and playback tests a frame
//! format with real sync recovery semantics but trivially constructible
//! payloads: `A5 5A <sample count> <rate index | channels>` followed by
//! little-endian `i16` samples.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::decode::{FrameCodec, FrameFormat, PcmFrame};
use crate::error::EngineError;
use crate::events::EngineEvents;
use crate::mp3::CodecFactory;
use crate::sink::{AudioSink, SinkFactory};
use crate::transport::Transport;

const BLOCK_HEADER_LEN: usize = 4;
const BLOCK_RATES: [u32; 2] = [8_000, 16_000];

/// Encode one block frame from interleaved samples.
pub(crate) fn block_frame(pcm: &[i16], channels: u16, rate_index: u8) -> Vec<u8> {
    assert!(!pcm.is_empty() && pcm.len() <= 255);
    assert!(pcm.len() % channels as usize == 0);
    let mut out = vec![
        0xA5,
        0x5A,
        pcm.len() as u8,
        (rate_index << 4) | channels as u8,
    ];
    for s in pcm {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn parse_block_header(window: &[u8]) -> Option<(usize, FrameFormat)> {
    if window.len() < BLOCK_HEADER_LEN || window[0] != 0xA5 || window[1] != 0x5A {
        return None;
    }
    let samples = window[2] as usize;
    let rate_index = (window[3] >> 4) as usize;
    let channels = (window[3] & 0x0F) as u16;
    if samples == 0 || !(1..=2).contains(&channels) || rate_index >= BLOCK_RATES.len() {
        return None;
    }
    if samples % channels as usize != 0 {
        return None;
    }
    Some((
        samples,
        FrameFormat {
            sample_rate: BLOCK_RATES[rate_index],
            channels,
        },
    ))
}

#[derive(Default)]
pub(crate) struct BlockCodec;

impl FrameCodec for BlockCodec {
    fn header_len(&self) -> usize {
        BLOCK_HEADER_LEN
    }

    fn find_sync(&self, window: &[u8]) -> Option<usize> {
        (0..window.len().saturating_sub(BLOCK_HEADER_LEN - 1))
            .find(|&i| parse_block_header(&window[i..]).is_some())
    }

    fn frame_len(&self, window: &[u8]) -> Option<usize> {
        parse_block_header(window).map(|(samples, _)| BLOCK_HEADER_LEN + samples * 2)
    }

    fn decode_frame(&mut self, frame: &[u8]) -> Result<PcmFrame, EngineError> {
        let (samples, format) = parse_block_header(frame)
            .ok_or_else(|| EngineError::Decode("bad block header".into()))?;
        if frame.len() != BLOCK_HEADER_LEN + samples * 2 {
            return Err(EngineError::Decode("short block frame".into()));
        }

        let pcm: Vec<i16> = frame[BLOCK_HEADER_LEN..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let frames = samples as u64 / u64::from(format.channels);
        Ok(PcmFrame {
            pcm,
            format,
            duration: Duration::from_nanos(
                frames * 1_000_000_000 / u64::from(format.sample_rate),
            ),
        })
    }

    fn reset(&mut self) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct BlockCodecFactory;

impl CodecFactory for BlockCodecFactory {
    fn create(&self) -> Box<dyn FrameCodec> {
        Box::new(BlockCodec)
    }
}

/// One scripted transport read: a data slice or a transient I/O error.
pub(crate) enum ReadStep {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

/// Reader driven by a script of [`ReadStep`]s; EOF once the script ends.
pub(crate) struct ScriptedReader {
    steps: VecDeque<ReadStep>,
}

impl ScriptedReader {
    pub(crate) fn new(steps: Vec<ReadStep>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None => Ok(0),
            Some(ReadStep::Error(kind)) => Err(io::Error::new(kind, "scripted failure")),
            Some(ReadStep::Data(data)) => {
                assert!(data.len() <= buf.len(), "scripted step larger than read buffer");
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
        }
    }
}

/// Transport serving scripted streams (one script per `open` call, in
/// order) plus optional text bodies keyed by URL.
pub(crate) struct FakeTransport {
    streams: Mutex<VecDeque<Vec<ReadStep>>>,
    pub(crate) text_bodies: Mutex<Vec<(String, String)>>,
    text_delay: Duration,
}

impl FakeTransport {
    pub(crate) fn new(steps: Vec<ReadStep>) -> Self {
        Self {
            streams: Mutex::new(VecDeque::from([steps])),
            text_bodies: Mutex::new(Vec::new()),
            text_delay: Duration::ZERO,
        }
    }

    /// Serve `bytes` in `piece` sized reads.
    pub(crate) fn serving(bytes: &[u8], piece: usize) -> Self {
        let steps = bytes
            .chunks(piece.max(1))
            .map(|c| ReadStep::Data(c.to_vec()))
            .collect();
        Self::new(steps)
    }

    /// Queue scripts for later `open` calls.
    pub(crate) fn with_more_streams(self, streams: Vec<Vec<ReadStep>>) -> Self {
        self.streams.lock().unwrap().extend(streams);
        self
    }

    pub(crate) fn with_text(self, url: &str, body: &str) -> Self {
        self.text_bodies
            .lock()
            .unwrap()
            .push((url.to_string(), body.to_string()));
        self
    }

    /// Make every `fetch_text` stall for `delay` before answering.
    pub(crate) fn with_text_delay(mut self, delay: Duration) -> Self {
        self.text_delay = delay;
        self
    }
}

impl Transport for FakeTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, EngineError> {
        let steps = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::Network(format!("open {url}: no stream scripted")))?;
        Ok(Box::new(ScriptedReader::new(steps)))
    }

    fn fetch_text(&self, url: &str) -> Result<String, EngineError> {
        if !self.text_delay.is_zero() {
            std::thread::sleep(self.text_delay);
        }
        self.text_bodies
            .lock()
            .unwrap()
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| EngineError::Network(format!("no body for {url}")))
    }
}

/// Everything a [`FakeSink`] observed, shared with the test body.
#[derive(Debug, Default)]
pub(crate) struct SinkLog {
    pub(crate) reconfigures: Vec<(u32, u16)>,
    pub(crate) samples: Vec<i16>,
}

pub(crate) struct FakeSink {
    log: Arc<Mutex<SinkLog>>,
    write_delay: Duration,
    fail_writes: bool,
}

impl AudioSink for FakeSink {
    fn reconfigure(&mut self, sample_rate: u32, channels: u16) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .reconfigures
            .push((sample_rate, channels));
        Ok(())
    }

    fn write(&mut self, pcm: &[i16]) -> anyhow::Result<usize> {
        if self.fail_writes {
            anyhow::bail!("device gone");
        }
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        self.log.lock().unwrap().samples.extend_from_slice(pcm);
        Ok(pcm.len())
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeSinkFactory {
    pub(crate) log: Arc<Mutex<SinkLog>>,
    pub(crate) write_delay: Duration,
    pub(crate) fail_writes: bool,
}

impl FakeSinkFactory {
    pub(crate) fn slow(write_delay: Duration) -> Self {
        Self {
            write_delay,
            ..Self::default()
        }
    }
}

impl SinkFactory for FakeSinkFactory {
    fn open(&self) -> anyhow::Result<Box<dyn AudioSink>> {
        Ok(Box::new(FakeSink {
            log: self.log.clone(),
            write_delay: self.write_delay,
            fail_writes: self.fail_writes,
        }))
    }
}

/// Records caption changes and counts spectrum frames.
#[derive(Default)]
pub(crate) struct FakeEvents {
    pub(crate) captions: Mutex<Vec<String>>,
    pub(crate) spectrum_frames: AtomicUsize,
}

impl EngineEvents for FakeEvents {
    fn on_spectrum_frame(&self, _pcm: &[i16]) {
        self.spectrum_frames.fetch_add(1, Ordering::Relaxed);
    }

    fn on_caption_changed(&self, text: &str) {
        self.captions.lock().unwrap().push(text.to_string());
    }
}
