//! Error types for the streaming engine.
//!
//! Session-level failures use [`EngineError`]; local, recoverable conditions
//! (a single sink-write failure, a transient read error) are handled and
//! logged where they occur and never surface here.

use thiserror::Error;

/// Session-level error taxonomy.
///
/// None of these abort the process; they end the session and are reported
/// through the controller's last-error string and session state.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Transport open/read failure or non-success status.
    #[error("network error: {0}")]
    Network(String),

    /// The decoder could not recover frame sync within the resync bound.
    #[error("decode error: {0}")]
    Decode(String),

    /// Pool/allocation exhaustion that persisted past the retry budget.
    #[error("resource error: {0}")]
    Resource(String),

    /// A thread failed to join within the configured shutdown bound.
    #[error("shutdown timeout: {0}")]
    ShutdownTimeout(String),

    /// The requested operation is not valid in the current session state.
    #[error("invalid state: {0}")]
    State(String),
}

/// Convenience result type for engine-internal fallible operations.
pub type Result<T> = std::result::Result<T, EngineError>;
