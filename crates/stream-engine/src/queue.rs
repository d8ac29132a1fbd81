//! Thread-safe bounded FIFO of compressed-byte chunks.
//!
//! This is the only channel between the download and playback threads:
//! - download thread → `push` (blocking while the buffer is full)
//! - player thread → `pop` (blocking while underrun)
//!
//! Byte order delivered to the decoder exactly matches transmission order;
//! chunk boundaries carry no meaning to the decoder. Backpressure is applied
//! by blocking the producer, never by dropping chunks — a dropped chunk
//! would desynchronize the decoder's byte stream.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::pool::Chunk;

/// Why a queue stopped accepting data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal end of stream; buffered data should drain.
    Complete,
    /// Stop was requested; waiters unblock immediately.
    Cancelled,
    /// The producer hit an unrecoverable error. Buffered data still drains
    /// before the consumer observes the failure.
    Failed(String),
}

/// Result of a blocking pop.
#[derive(Debug)]
pub enum PopResult {
    /// One or more chunks in FIFO order.
    Data(Vec<Chunk>),
    /// The queue is closed and fully drained.
    Closed(CloseReason),
}

/// Bounded producer/consumer queue with a running byte-size counter.
///
/// A single [`Condvar`] serves as a general "state changed" signal; the
/// close reason lives under the same mutex as the chunks to avoid races
/// between closing and waiting.
#[derive(Debug)]
pub struct ChunkQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_buffer_bytes: usize,
}

#[derive(Debug)]
struct QueueInner {
    chunks: VecDeque<Chunk>,
    total_bytes: usize,
    closed: Option<CloseReason>,
}

impl ChunkQueue {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::new(),
                total_bytes: 0,
                closed: None,
            }),
            cv: Condvar::new(),
            max_buffer_bytes,
        }
    }

    /// Enqueue a chunk, blocking while the buffer is full.
    ///
    /// The wait is re-validated after every wake. Returns the close reason
    /// instead of blocking forever once the queue is closed; the rejected
    /// chunk returns to its pool when dropped by the caller.
    pub fn push(&self, chunk: Chunk) -> Result<(), CloseReason> {
        let mut g = self.inner.lock().unwrap();

        // Admit an oversize chunk only into an empty queue so the byte cap
        // holds whenever anything is already buffered.
        while g.closed.is_none()
            && g.total_bytes > 0
            && g.total_bytes + chunk.len() > self.max_buffer_bytes
        {
            g = self.cv.wait(g).unwrap();
        }
        if let Some(reason) = &g.closed {
            return Err(reason.clone());
        }

        g.total_bytes += chunk.len();
        g.chunks.push_back(chunk);
        drop(g);
        self.cv.notify_all();
        Ok(())
    }

    /// Dequeue chunks, blocking until at least `min_bytes` are buffered or
    /// the queue is closed.
    ///
    /// A closed queue is drained before the close reason is reported: the
    /// final pops may return fewer than `min_bytes`.
    pub fn pop(&self, min_bytes: usize) -> PopResult {
        let mut g = self.inner.lock().unwrap();

        while g.closed.is_none() && g.total_bytes < min_bytes.max(1) {
            g = self.cv.wait(g).unwrap();
        }

        if g.chunks.is_empty() {
            // Closed and drained; push/close always wake us, so a reason
            // is present here.
            let reason = g.closed.clone().unwrap_or(CloseReason::Complete);
            return PopResult::Closed(reason);
        }

        let mut out = Vec::new();
        let mut taken = 0usize;
        while taken < min_bytes.max(1) {
            match g.chunks.pop_front() {
                Some(chunk) => {
                    taken += chunk.len();
                    g.total_bytes -= chunk.len();
                    out.push(chunk);
                }
                None => break,
            }
        }

        drop(g);
        self.cv.notify_all();
        PopResult::Data(out)
    }

    /// Mark the queue terminal and wake all waiters.
    ///
    /// Idempotent; the first reason wins.
    pub fn close(&self, reason: CloseReason) {
        let mut g = self.inner.lock().unwrap();
        if g.closed.is_none() {
            g.closed = Some(reason);
        }
        drop(g);
        self.cv.notify_all();
    }

    /// Configured byte cap.
    pub fn capacity(&self) -> usize {
        self.max_buffer_bytes
    }

    /// Bytes currently resident (best-effort snapshot).
    pub fn bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }

    /// The close reason, if the queue has been closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.lock().unwrap().closed.clone()
    }
}
