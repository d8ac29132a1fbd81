use serde::{Deserialize, Serialize};

/// Lifecycle state of a playback session.
///
/// Exactly one session may be [`SessionState::Active`] at a time; a second
/// start request while active is rejected, not queued.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session in progress; a new one may be started.
    #[default]
    Idle,
    /// Downloading and/or playing.
    Active,
    /// The last session ended with an unrecoverable error. Requires an
    /// explicit stop/reset before a new session can start.
    Error,
}

/// What the display layer should render while music plays.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Spectrum visualization driven by decoded PCM frames.
    Spectrum,
    /// Time-synchronized captions driven by the playback clock.
    #[default]
    Captions,
}

/// Reason why a playback session ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of stream, tail fully played.
    Complete,
    /// Playback was explicitly stopped.
    Stopped,
    /// Transport open/read failure ended the session.
    NetworkError,
    /// The decoder could not recover frame sync.
    DecodeError,
    /// The audio output could not be opened or reconfigured.
    OutputError,
}

/// Point-in-time snapshot of the engine, suitable for status endpoints
/// and CLI output.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStatus {
    /// Session lifecycle state.
    pub state: SessionState,
    /// `true` while the downloader thread is pulling bytes.
    pub downloading: bool,
    /// `true` while the player thread is producing audio.
    pub playing: bool,
    /// Compressed bytes currently resident in the stream buffer.
    pub buffered_bytes: u64,
    /// Playback clock in milliseconds (audio actually handed to the sink).
    pub elapsed_ms: u64,
    /// URL of the stream being played, if any.
    pub now_playing: Option<String>,
    /// Last session-level error message; `None` when no error is pending.
    pub last_error: Option<String>,
    /// Terminal reason from the most recently ended session.
    pub end_reason: Option<PlaybackEndReason>,
}
