//! Session lifecycle and the engine's public control surface.
//!
//! [`StreamController`] owns at most one session at a time. A session is
//! the download thread, the player thread, and optionally a caption
//! thread, all sharing one cancel flag and one bounded stream buffer. The
//! session state machine is a single atomic: `Idle -> Active` on start,
//! back to `Idle` on completion or stop, `Error` on failure. A failed
//! session holds the `Error` state (and its error message) until an
//! explicit stop resets it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use stream_types::{DisplayMode, EngineStatus, PlaybackEndReason, SessionState};

use crate::clock::PlaybackClock;
use crate::config::EngineConfig;
use crate::download::DownloadTask;
use crate::error::EngineError;
use crate::events::{EngineEvents, NoEvents};
use crate::lyrics::{CaptionTask, CaptionTrack};
use crate::mp3::{CodecFactory, Mp3CodecFactory};
use crate::player::{PlayerExit, PlayerTask};
use crate::pool::ChunkPool;
use crate::queue::{ChunkQueue, CloseReason};
use crate::sink::SinkFactory;
use crate::transport::Transport;

const STATE_IDLE: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_ERROR: u8 = 2;

/// Flags and bookkeeping shared between the controller and its worker
/// threads.
struct Shared {
    state: AtomicU8,
    downloading: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    last_error: Mutex<Option<String>>,
    end_reason: Mutex<Option<PlaybackEndReason>>,
}

impl Shared {
    fn set_error(&self, err: &EngineError) {
        *self.last_error.lock().unwrap() = Some(err.to_string());
        self.state.store(STATE_ERROR, Ordering::Release);
    }
}

/// Live worker threads for one stream.
struct Session {
    cancel: Arc<AtomicBool>,
    queue: Arc<ChunkQueue>,
    download: Option<JoinHandle<()>>,
    player: Option<JoinHandle<()>>,
    captions: Option<JoinHandle<()>>,
}

impl Session {
    fn is_finished(&self) -> bool {
        self.download.as_ref().is_none_or(|h| h.is_finished())
            && self.player.as_ref().is_none_or(|h| h.is_finished())
            && self.captions.as_ref().is_none_or(|h| h.is_finished())
    }
}

/// Owns playback sessions and exposes start/stop/query operations.
///
/// All methods take `&self` and are safe to call from any thread; start
/// and stop serialize on an internal lock.
pub struct StreamController {
    cfg: EngineConfig,
    transport: Arc<dyn Transport>,
    sink_factory: Arc<dyn SinkFactory>,
    codec_factory: Arc<dyn CodecFactory>,
    events: Arc<dyn EngineEvents>,
    pool: ChunkPool,
    clock: Arc<PlaybackClock>,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    caption_url: Mutex<Option<String>>,
    display_mode: Mutex<DisplayMode>,
    now_playing: Mutex<Option<String>>,
}

impl StreamController {
    /// Build a controller that decodes MP3 and reports no events.
    pub fn new(
        cfg: EngineConfig,
        transport: Arc<dyn Transport>,
        sink_factory: Arc<dyn SinkFactory>,
    ) -> Self {
        let pool = ChunkPool::new(cfg.pool_max_free, cfg.pool_max_outstanding);
        Self {
            cfg,
            transport,
            sink_factory,
            codec_factory: Arc::new(Mp3CodecFactory),
            events: Arc::new(NoEvents),
            pool,
            clock: Arc::new(PlaybackClock::new()),
            shared: Arc::new(Shared {
                state: AtomicU8::new(STATE_IDLE),
                downloading: Arc::new(AtomicBool::new(false)),
                playing: Arc::new(AtomicBool::new(false)),
                last_error: Mutex::new(None),
                end_reason: Mutex::new(None),
            }),
            session: Mutex::new(None),
            caption_url: Mutex::new(None),
            display_mode: Mutex::new(DisplayMode::default()),
            now_playing: Mutex::new(None),
        }
    }

    /// Replace the event sink (spectrum frames, caption changes).
    pub fn with_events(mut self, events: Arc<dyn EngineEvents>) -> Self {
        self.events = events;
        self
    }

    /// Replace the frame codec (tests use a synthetic one).
    pub fn with_codec_factory(mut self, factory: Arc<dyn CodecFactory>) -> Self {
        self.codec_factory = factory;
        self
    }

    /// Start streaming `url`.
    ///
    /// Rejected while a session is active and while a failed session's
    /// error state has not been cleared by [`StreamController::stop_streaming`].
    pub fn start_streaming(&self, url: &str) -> crate::error::Result<()> {
        let mut session = self.session.lock().unwrap();

        // Reap a naturally-ended session so its slot frees up.
        if session.as_ref().is_some_and(|s| s.is_finished()) {
            if let Some(s) = session.take() {
                join_all(s, Instant::now() + self.cfg.join_timeout);
            }
        }

        match self.shared.state.compare_exchange(
            STATE_IDLE,
            STATE_ACTIVE,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_ERROR) => {
                return Err(EngineError::State(
                    "previous session failed; stop to clear the error".into(),
                ));
            }
            Err(_) => {
                return Err(EngineError::State("a session is already active".into()));
            }
        }

        tracing::info!("starting stream: {url}");
        self.clock.reset();
        *self.shared.last_error.lock().unwrap() = None;
        *self.shared.end_reason.lock().unwrap() = None;
        *self.now_playing.lock().unwrap() = Some(url.to_string());
        self.shared.downloading.store(true, Ordering::Release);
        self.shared.playing.store(false, Ordering::Release);

        let cancel = Arc::new(AtomicBool::new(false));
        let queue = Arc::new(ChunkQueue::new(self.cfg.max_buffer_bytes));

        let download = {
            let task = DownloadTask {
                transport: self.transport.clone(),
                url: url.to_string(),
                pool: self.pool.clone(),
                queue: queue.clone(),
                cancel: cancel.clone(),
                cfg: self.cfg.clone(),
            };
            let shared = self.shared.clone();
            match self.spawn("stream-download", move || {
                task.run();
                shared.downloading.store(false, Ordering::Release);
            }) {
                Ok(h) => h,
                Err(e) => {
                    self.shared.downloading.store(false, Ordering::Release);
                    self.shared.state.store(STATE_IDLE, Ordering::Release);
                    return Err(e);
                }
            }
        };

        let player = {
            let task = PlayerTask {
                queue: queue.clone(),
                sink_factory: self.sink_factory.clone(),
                codec_factory: self.codec_factory.clone(),
                clock: self.clock.clone(),
                events: self.events.clone(),
                cancel: cancel.clone(),
                playing: self.shared.playing.clone(),
                cfg: self.cfg.clone(),
            };
            let shared = self.shared.clone();
            let cancel_cb = cancel.clone();
            let queue_cb = queue.clone();
            match self.spawn("stream-player", move || {
                let exit = task.run();
                shared.playing.store(false, Ordering::Release);
                // End of playback ends the whole session: release the
                // captions thread and any downloader blocked on a full
                // buffer.
                cancel_cb.store(true, Ordering::Release);
                queue_cb.close(CloseReason::Cancelled);

                match exit {
                    PlayerExit::Complete => {
                        tracing::info!("stream complete");
                        *shared.end_reason.lock().unwrap() = Some(PlaybackEndReason::Complete);
                        shared.state.store(STATE_IDLE, Ordering::Release);
                    }
                    PlayerExit::Cancelled => {
                        *shared.end_reason.lock().unwrap() = Some(PlaybackEndReason::Stopped);
                        shared.state.store(STATE_IDLE, Ordering::Release);
                    }
                    PlayerExit::Failed(e) => {
                        tracing::warn!("stream failed: {e}");
                        *shared.end_reason.lock().unwrap() = Some(end_reason_for(&e));
                        shared.set_error(&e);
                    }
                }
            }) {
                Ok(h) => h,
                Err(e) => {
                    cancel.store(true, Ordering::Release);
                    queue.close(CloseReason::Cancelled);
                    let _ = download.join();
                    self.shared.state.store(STATE_IDLE, Ordering::Release);
                    return Err(e);
                }
            }
        };

        let captions = self.spawn_captions(&cancel);

        *session = Some(Session {
            cancel,
            queue,
            download: Some(download),
            player: Some(player),
            captions,
        });
        Ok(())
    }

    /// Stop the current session, if any, and clear a pending error state.
    ///
    /// Idempotent. Returns `false` only when a worker thread failed to
    /// exit within the configured join bound; the controller then stays
    /// in the error state with the threads detached.
    pub fn stop_streaming(&self) -> bool {
        let taken = self.session.lock().unwrap().take();
        let Some(s) = taken else {
            // Nothing running; a lingering error state resets to idle.
            let _ = self.shared.state.compare_exchange(
                STATE_ERROR,
                STATE_IDLE,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            return true;
        };

        tracing::info!("stopping stream");
        s.cancel.store(true, Ordering::Release);
        s.queue.close(CloseReason::Cancelled);

        // The session lock is already released here: status queries must
        // not stall behind the join wait.
        let deadline = Instant::now() + self.cfg.join_timeout;
        if join_all(s, deadline) {
            self.shared.state.store(STATE_IDLE, Ordering::Release);
            true
        } else {
            let err = EngineError::ShutdownTimeout(format!(
                "worker did not exit within {:?}",
                self.cfg.join_timeout
            ));
            tracing::warn!("{err}");
            self.shared.set_error(&err);
            false
        }
    }

    /// Set or clear the caption source for subsequent sessions.
    pub fn set_caption_source(&self, url: Option<&str>) {
        *self.caption_url.lock().unwrap() = url.map(str::to_string);
    }

    /// Select what the display layer renders; gates whether the caption
    /// thread runs for subsequent sessions.
    pub fn set_display_mode(&self, mode: DisplayMode) {
        *self.display_mode.lock().unwrap() = mode;
    }

    pub fn state(&self) -> SessionState {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_ACTIVE => SessionState::Active,
            STATE_ERROR => SessionState::Error,
            _ => SessionState::Idle,
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.shared.downloading.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Compressed bytes currently resident in the stream buffer.
    pub fn buffered_bytes(&self) -> u64 {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |s| s.queue.bytes() as u64)
    }

    /// Message from the most recent session failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap().clone()
    }

    /// Terminal reason from the most recently ended session.
    pub fn end_reason(&self) -> Option<PlaybackEndReason> {
        *self.shared.end_reason.lock().unwrap()
    }

    /// Point-in-time snapshot of the whole engine.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            downloading: self.is_downloading(),
            playing: self.is_playing(),
            buffered_bytes: self.buffered_bytes(),
            elapsed_ms: self.clock.millis(),
            now_playing: self.now_playing.lock().unwrap().clone(),
            last_error: self.last_error(),
            end_reason: self.end_reason(),
        }
    }

    /// Start the caption thread when captions are both configured and
    /// selected. The source is fetched and parsed on the caption thread,
    /// so a stalled caption server never delays playback start. Caption
    /// problems never fail the session.
    fn spawn_captions(&self, cancel: &Arc<AtomicBool>) -> Option<JoinHandle<()>> {
        if *self.display_mode.lock().unwrap() != DisplayMode::Captions {
            return None;
        }
        let url = self.caption_url.lock().unwrap().clone()?;

        let transport = self.transport.clone();
        let clock = self.clock.clone();
        let events = self.events.clone();
        let cancel = cancel.clone();
        let poll_interval = self.cfg.caption_poll_interval;
        let lead_ms = self.cfg.caption_lead_ms;
        match self.spawn("stream-captions", move || {
            let track = match transport.fetch_text(&url) {
                Ok(text) => CaptionTrack::parse(&text),
                Err(e) => {
                    tracing::warn!("caption fetch failed, continuing without: {e}");
                    return;
                }
            };
            if track.is_empty() {
                tracing::debug!("caption source {url} parsed to zero lines");
                return;
            }
            CaptionTask {
                track,
                clock,
                events,
                cancel,
                poll_interval,
                lead_ms,
            }
            .run();
        }) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("caption thread failed to start, continuing without: {e}");
                None
            }
        }
    }

    fn spawn(
        &self,
        name: &str,
        f: impl FnOnce() + Send + 'static,
    ) -> crate::error::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|e| EngineError::Resource(format!("spawn {name}: {e}")))
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

fn end_reason_for(err: &EngineError) -> PlaybackEndReason {
    match err {
        EngineError::Network(_) => PlaybackEndReason::NetworkError,
        EngineError::Decode(_) => PlaybackEndReason::DecodeError,
        _ => PlaybackEndReason::OutputError,
    }
}

/// Join every session thread, giving up at `deadline`.
///
/// `std` has no timed join, so this polls `is_finished`. Handles that miss
/// the deadline are dropped, detaching the thread.
fn join_all(mut session: Session, deadline: Instant) -> bool {
    let handles = [
        session.download.take(),
        session.player.take(),
        session.captions.take(),
    ];
    let mut all_joined = true;
    for handle in handles.into_iter().flatten() {
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                all_joined = false;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            let _ = handle.join();
        }
    }
    all_joined
}
