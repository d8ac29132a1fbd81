//! Timed captions (LRC) parsing and playback-synchronized dispatch.
//!
//! A [`CaptionTrack`] is an immutable, time-sorted list of lines. During
//! playback a caption thread polls the playback clock and fires
//! [`crate::events::EngineEvents::on_caption_changed`] once per line the
//! clock passes. Selection adds a fixed lead so the caption lands when the
//! audio is actually heard, not when it leaves the decoder.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::clock::PlaybackClock;
use crate::events::EngineEvents;

/// One caption with its display time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptionLine {
    pub at_ms: u64,
    pub text: String,
}

/// Parsed caption track, sorted by display time.
#[derive(Clone, Debug, Default)]
pub struct CaptionTrack {
    lines: Vec<CaptionLine>,
}

impl CaptionTrack {
    /// Parse LRC text.
    ///
    /// Handles `[mm:ss.cc]` and `[mm:ss]` timestamps, several timestamps
    /// sharing one text, and empty caption texts (used to blank the
    /// display between verses). Metadata tags like `[ar:...]` and
    /// unparseable lines are skipped; parsing never fails outright.
    pub fn parse(lrc: &str) -> Self {
        let mut lines = Vec::new();
        for raw in lrc.lines() {
            let mut rest = raw.trim();
            let mut stamps = Vec::new();
            while let Some(tail) = rest.strip_prefix('[') {
                let Some(end) = tail.find(']') else { break };
                match parse_timestamp(&tail[..end]) {
                    Some(ms) => stamps.push(ms),
                    None => {
                        stamps.clear();
                        break; // metadata tag, ignore the whole line
                    }
                }
                rest = tail[end + 1..].trim_start();
            }
            for at_ms in stamps {
                lines.push(CaptionLine {
                    at_ms,
                    text: rest.to_string(),
                });
            }
        }
        lines.sort_by_key(|l| l.at_ms);
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Index of the line current at `ms`: the last line whose time has been
    /// reached, or `None` before the first line.
    pub fn line_at(&self, ms: u64) -> Option<usize> {
        let n = self.lines.partition_point(|l| l.at_ms <= ms);
        n.checked_sub(1)
    }

    pub fn line(&self, index: usize) -> &CaptionLine {
        &self.lines[index]
    }
}

/// `mm:ss`, `mm:ss.c`, `mm:ss.cc` or `mm:ss.ccc` into milliseconds.
fn parse_timestamp(s: &str) -> Option<u64> {
    let (minutes, seconds) = s.split_once(':')?;
    let minutes: u64 = minutes.parse().ok()?;

    let (secs, frac_ms) = match seconds.split_once('.') {
        None => (seconds.parse::<u64>().ok()?, 0),
        Some((whole, frac)) => {
            if frac.is_empty() || frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let value: u64 = frac.parse().ok()?;
            let scale = 10u64.pow(3 - frac.len() as u32);
            (whole.parse::<u64>().ok()?, value * scale)
        }
    };
    if secs >= 60 {
        return None;
    }
    Some(minutes * 60_000 + secs * 1_000 + frac_ms)
}

/// Caption dispatch loop, run on its own thread per session.
pub(crate) struct CaptionTask {
    pub(crate) track: CaptionTrack,
    pub(crate) clock: Arc<PlaybackClock>,
    pub(crate) events: Arc<dyn EngineEvents>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) poll_interval: Duration,
    pub(crate) lead_ms: u64,
}

impl CaptionTask {
    /// Poll until cancelled, firing each passed line exactly once.
    ///
    /// The cursor only moves forward: if a slow poll cycle skips over
    /// several lines, only the newest one fires.
    pub(crate) fn run(self) {
        let mut cursor: Option<usize> = None;
        while !self.cancel.load(Ordering::Acquire) {
            let ms = self.clock.millis() + self.lead_ms;
            if let Some(idx) = self.track.line_at(ms) {
                if cursor.is_none_or(|c| idx > c) {
                    self.events.on_caption_changed(&self.track.line(idx).text);
                    cursor = Some(idx);
                }
            }
            thread::sleep(self.poll_interval);
        }
    }
}
