//! Recycling pool for the byte buffers that carry compressed audio.
//!
//! The downloader acquires a [`Chunk`] per transport read and the queue
//! hands it to the player; the buffer returns to the pool automatically
//! when the chunk is dropped, on every exit path. Recycling bounds
//! per-chunk heap churn during a long stream.

use std::sync::{Arc, Mutex};

/// Shared, thread-safe free-list of reusable byte buffers.
///
/// - `acquire` prefers a previously released buffer whose capacity covers
///   the request; an undersized candidate is discarded and a fresh buffer
///   allocated, bounding fragmentation.
/// - At most `max_free` released buffers are retained; beyond that,
///   `release` frees instead.
/// - At most `max_outstanding` chunks may be live at once; `acquire`
///   returns `None` past that cap, which callers treat as allocation
///   exhaustion.
#[derive(Clone, Debug)]
pub struct ChunkPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    state: Mutex<PoolState>,
    max_free: usize,
    max_outstanding: usize,
}

#[derive(Debug)]
struct PoolState {
    free: Vec<Box<[u8]>>,
    outstanding: usize,
}

impl ChunkPool {
    pub fn new(max_free: usize, max_outstanding: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    outstanding: 0,
                }),
                max_free,
                max_outstanding,
            }),
        }
    }

    /// Get a buffer of at least `size` bytes, or `None` when the live-chunk
    /// cap is reached.
    pub fn acquire(&self, size: usize) -> Option<Chunk> {
        let mut state = self.inner.state.lock().unwrap();
        if state.outstanding >= self.inner.max_outstanding {
            return None;
        }

        let buf = match state.free.pop() {
            Some(candidate) if candidate.len() >= size => candidate,
            // Undersized candidate is dropped here rather than kept.
            _ => vec![0u8; size].into_boxed_slice(),
        };
        state.outstanding += 1;
        drop(state);

        Some(Chunk {
            buf,
            len: 0,
            pool: self.inner.clone(),
        })
    }

    /// Drop all retained free buffers.
    pub fn clear(&self) {
        self.inner.state.lock().unwrap().free.clear();
    }

    /// Live chunks currently held by callers.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().unwrap().outstanding
    }

    /// Released buffers currently retained for reuse.
    pub fn free_count(&self) -> usize {
        self.inner.state.lock().unwrap().free.len()
    }
}

impl PoolInner {
    fn release(&self, buf: Box<[u8]>) {
        let mut state = self.state.lock().unwrap();
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.free.len() < self.max_free {
            state.free.push(buf);
        }
        // else: freed on drop
    }
}

/// An owned byte buffer leased from a [`ChunkPool`].
///
/// Exactly one owner at a time; the buffer returns to its pool when the
/// chunk is dropped.
#[derive(Debug)]
pub struct Chunk {
    buf: Box<[u8]>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl Chunk {
    /// The filled prefix of the buffer.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Full writable capacity, regardless of the current length.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Record how many bytes of the buffer are valid, clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_on_drop_enables_reuse() {
        let pool = ChunkPool::new(4, 16);
        let first = pool.acquire(64).unwrap();
        assert_eq!(pool.outstanding(), 1);
        drop(first);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.free_count(), 1);

        // Second acquisition reuses the retained buffer.
        let second = pool.acquire(32).unwrap();
        assert_eq!(second.capacity(), 64);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn undersized_free_buffer_is_discarded() {
        let pool = ChunkPool::new(4, 16);
        drop(pool.acquire(16).unwrap());
        assert_eq!(pool.free_count(), 1);

        let big = pool.acquire(128).unwrap();
        assert_eq!(big.capacity(), 128);
        // The 16-byte candidate was discarded, not kept alongside.
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn free_list_is_capped() {
        let pool = ChunkPool::new(2, 16);
        let chunks: Vec<_> = (0..4).map(|_| pool.acquire(8).unwrap()).collect();
        drop(chunks);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn outstanding_cap_fails_acquire() {
        let pool = ChunkPool::new(2, 2);
        let a = pool.acquire(8).unwrap();
        let b = pool.acquire(8).unwrap();
        assert!(pool.acquire(8).is_none());
        drop(a);
        assert!(pool.acquire(8).is_some());
        drop(b);
    }

    #[test]
    fn set_len_clamps_to_capacity() {
        let pool = ChunkPool::new(2, 2);
        let mut chunk = pool.acquire(8).unwrap();
        chunk.set_len(100);
        assert_eq!(chunk.len(), 8);
        assert_eq!(chunk.data().len(), 8);
    }
}
