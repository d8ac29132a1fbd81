//! Download stage: transport reads into pooled chunks, pushed into the
//! bounded stream buffer.
//!
//! The downloader is the only writer of the queue's close reason on its own
//! exit paths; the player learns about network failures solely through the
//! reason it observes after draining. A leading ID3v2 tag is stripped here
//! so the decoder never has to resync past kilobytes of metadata.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::config::EngineConfig;
use crate::pool::{Chunk, ChunkPool};
use crate::queue::{ChunkQueue, CloseReason};
use crate::transport::Transport;

pub(crate) struct DownloadTask {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) url: String,
    pub(crate) pool: ChunkPool,
    pub(crate) queue: Arc<ChunkQueue>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) cfg: EngineConfig,
}

impl DownloadTask {
    /// Read the stream to EOF, close the queue with the outcome, and return.
    ///
    /// Every exit path closes the queue exactly once; chunks in flight drop
    /// back to the pool automatically.
    pub(crate) fn run(self) {
        let mut reader = match self.transport.open(&self.url) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("open {} failed: {e}", self.url);
                self.queue.close(CloseReason::Failed(e.to_string()));
                return;
            }
        };
        tracing::debug!("download started: {}", self.url);

        let mut strip = MetadataStrip::new();
        let mut read_errors = 0u32;
        let mut total_bytes = 0u64;

        loop {
            if self.cancel.load(Ordering::Acquire) {
                self.queue.close(CloseReason::Cancelled);
                return;
            }

            let mut chunk = match self.acquire_chunk(self.cfg.chunk_bytes) {
                Some(c) => c,
                None => {
                    self.queue
                        .close(CloseReason::Failed("chunk pool exhausted".into()));
                    return;
                }
            };

            let n = match reader.read(chunk.buf_mut()) {
                Ok(n) => {
                    read_errors = 0;
                    n
                }
                Err(e) => {
                    read_errors += 1;
                    if read_errors >= self.cfg.read_retry_limit {
                        tracing::warn!("stream read failed {read_errors} times: {e}");
                        self.queue
                            .close(CloseReason::Failed(format!("stream read: {e}")));
                        return;
                    }
                    tracing::debug!("stream read error (attempt {read_errors}): {e}");
                    thread::sleep(self.cfg.read_retry_backoff);
                    continue;
                }
            };

            if n == 0 {
                tracing::debug!("download complete: {total_bytes} bytes");
                self.queue.close(CloseReason::Complete);
                return;
            }
            total_bytes += n as u64;
            chunk.set_len(n);

            if !strip.done() {
                // Metadata phase: forward whatever survives the strip in a
                // fresh chunk (the stash can make it exceed this one).
                let out = strip.feed(chunk.data());
                drop(chunk);
                if out.is_empty() {
                    continue;
                }
                let mut forwarded = match self.acquire_chunk(out.len()) {
                    Some(c) => c,
                    None => {
                        self.queue
                            .close(CloseReason::Failed("chunk pool exhausted".into()));
                        return;
                    }
                };
                forwarded.buf_mut()[..out.len()].copy_from_slice(&out);
                forwarded.set_len(out.len());
                chunk = forwarded;
            }

            if self.queue.push(chunk).is_err() {
                // Closed from the consumer side; reason already recorded.
                return;
            }
        }
    }

    /// Acquire a chunk, retrying with backoff while the pool is exhausted.
    fn acquire_chunk(&self, size: usize) -> Option<Chunk> {
        for attempt in 0..=self.cfg.alloc_retry_limit {
            if self.cancel.load(Ordering::Acquire) {
                return None;
            }
            if let Some(chunk) = self.pool.acquire(size) {
                return Some(chunk);
            }
            if attempt < self.cfg.alloc_retry_limit {
                tracing::debug!("chunk pool exhausted, retrying (attempt {attempt})");
                thread::sleep(self.cfg.alloc_backoff);
            }
        }
        None
    }
}

const ID3_HEADER_LEN: usize = 10;

/// Strips one leading ID3v2 tag from the byte stream.
///
/// Operates on the raw stream before any chunk reaches the queue, so tag
/// size is unbounded by chunk size. Anything that is not an ID3v2 tag
/// passes through untouched from the first byte.
pub(crate) struct MetadataStrip {
    state: StripState,
}

enum StripState {
    /// Accumulating the first bytes until the tag question is decided.
    Probe(Vec<u8>),
    /// Inside the tag; bytes remaining to discard.
    Skip(u64),
    /// Past the tag (or there was none).
    Pass,
}

impl MetadataStrip {
    pub(crate) fn new() -> Self {
        Self {
            state: StripState::Probe(Vec::new()),
        }
    }

    pub(crate) fn done(&self) -> bool {
        matches!(self.state, StripState::Pass)
    }

    /// Feed the next stream bytes; returns the bytes to forward downstream.
    pub(crate) fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        match &mut self.state {
            StripState::Pass => data.to_vec(),
            StripState::Skip(remaining) => {
                if (data.len() as u64) < *remaining {
                    *remaining -= data.len() as u64;
                    Vec::new()
                } else {
                    let keep = data[*remaining as usize..].to_vec();
                    self.state = StripState::Pass;
                    keep
                }
            }
            StripState::Probe(stash) => {
                stash.extend_from_slice(data);
                let head = &stash[..stash.len().min(ID3_HEADER_LEN)];
                if !b"ID3".starts_with(&head[..head.len().min(3)]) {
                    // Not a tag; release everything buffered so far.
                    let out = std::mem::take(stash);
                    self.state = StripState::Pass;
                    return out;
                }
                if stash.len() < ID3_HEADER_LEN {
                    return Vec::new();
                }

                // Synchsafe 28-bit size, header excluded; footer adds 10.
                let size = (u64::from(stash[6] & 0x7F) << 21)
                    | (u64::from(stash[7] & 0x7F) << 14)
                    | (u64::from(stash[8] & 0x7F) << 7)
                    | u64::from(stash[9] & 0x7F);
                let footer = if stash[5] & 0x10 != 0 { 10 } else { 0 };
                let total = ID3_HEADER_LEN as u64 + size + footer;

                if (stash.len() as u64) < total {
                    let remaining = total - stash.len() as u64;
                    self.state = StripState::Skip(remaining);
                    Vec::new()
                } else {
                    let keep = stash[total as usize..].to_vec();
                    self.state = StripState::Pass;
                    keep
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::PopResult;
    use crate::testutil::{FakeTransport, ReadStep};
    use std::io;
    use std::time::Duration;

    fn drain(queue: &ChunkQueue) -> (Vec<u8>, CloseReason) {
        let mut bytes = Vec::new();
        loop {
            match queue.pop(1) {
                PopResult::Data(chunks) => {
                    for c in chunks {
                        bytes.extend_from_slice(c.data());
                    }
                }
                PopResult::Closed(reason) => return (bytes, reason),
            }
        }
    }

    fn task(transport: FakeTransport) -> (DownloadTask, Arc<ChunkQueue>) {
        let cfg = EngineConfig {
            read_retry_backoff: Duration::from_millis(1),
            alloc_backoff: Duration::from_millis(1),
            ..EngineConfig::default()
        };
        let queue = Arc::new(ChunkQueue::new(cfg.max_buffer_bytes));
        let task = DownloadTask {
            transport: Arc::new(transport),
            url: "http://x/stream.mp3".into(),
            pool: ChunkPool::new(cfg.pool_max_free, cfg.pool_max_outstanding),
            queue: queue.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
            cfg,
        };
        (task, queue)
    }

    fn id3_tag(body_len: usize) -> Vec<u8> {
        let mut tag = vec![b'I', b'D', b'3', 3, 0, 0];
        let size = body_len as u32;
        tag.extend_from_slice(&[
            ((size >> 21) & 0x7F) as u8,
            ((size >> 14) & 0x7F) as u8,
            ((size >> 7) & 0x7F) as u8,
            (size & 0x7F) as u8,
        ]);
        tag.extend(std::iter::repeat(0xEE).take(body_len));
        tag
    }

    #[test]
    fn downloads_to_completion_in_order() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let (task, queue) = task(FakeTransport::serving(&payload, 7));
        task.run();
        let (bytes, reason) = drain(&queue);
        assert_eq!(bytes, payload);
        assert_eq!(reason, CloseReason::Complete);
    }

    #[test]
    fn leading_id3_tag_is_stripped() {
        let mut stream = id3_tag(300);
        stream.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let (task, queue) = task(FakeTransport::serving(&stream, 16));
        task.run();
        let (bytes, reason) = drain(&queue);
        assert_eq!(bytes, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(reason, CloseReason::Complete);
    }

    #[test]
    fn transient_read_errors_are_retried() {
        let (task, queue) = task(FakeTransport::new(vec![
            ReadStep::Data(vec![1, 2]),
            ReadStep::Error(io::ErrorKind::Interrupted),
            ReadStep::Data(vec![3, 4]),
            ReadStep::Error(io::ErrorKind::Interrupted),
            ReadStep::Data(vec![5]),
        ]));
        task.run();
        let (bytes, reason) = drain(&queue);
        assert_eq!(bytes, vec![1, 2, 3, 4, 5]);
        assert_eq!(reason, CloseReason::Complete);
    }

    #[test]
    fn repeated_read_errors_fail_the_download() {
        let (task, queue) = task(FakeTransport::new(vec![
            ReadStep::Data(vec![1]),
            ReadStep::Error(io::ErrorKind::ConnectionReset),
            ReadStep::Error(io::ErrorKind::ConnectionReset),
            ReadStep::Error(io::ErrorKind::ConnectionReset),
            ReadStep::Data(vec![2]),
        ]));
        task.run();
        let (bytes, reason) = drain(&queue);
        // Data read before the failure still drains.
        assert_eq!(bytes, vec![1]);
        assert!(matches!(reason, CloseReason::Failed(_)));
    }

    #[test]
    fn cancellation_closes_as_cancelled() {
        let (task, queue) = task(FakeTransport::serving(&[0u8; 64], 8));
        task.cancel.store(true, Ordering::Release);
        task.run();
        let (bytes, reason) = drain(&queue);
        assert!(bytes.is_empty());
        assert_eq!(reason, CloseReason::Cancelled);
    }

    #[test]
    fn open_failure_closes_as_failed() {
        let transport = FakeTransport::serving(&[], 1);
        // First open consumes the script; run a second task against the
        // same transport so open fails.
        let _ = transport.open("http://x/first");
        let (task, queue) = task(transport);
        task.run();
        let (_, reason) = drain(&queue);
        assert!(matches!(reason, CloseReason::Failed(_)));
    }

    #[test]
    fn id3_tag_split_across_many_reads() {
        let mut stream = id3_tag(40);
        stream.extend_from_slice(&[9, 9, 9, 9]);
        // 3-byte reads split even the 10-byte tag header.
        let (task, queue) = task(FakeTransport::serving(&stream, 3));
        task.run();
        let (bytes, reason) = drain(&queue);
        assert_eq!(bytes, vec![9, 9, 9, 9]);
        assert_eq!(reason, CloseReason::Complete);
    }

    #[test]
    fn strip_passes_untagged_stream_through() {
        let mut strip = MetadataStrip::new();
        assert_eq!(strip.feed(b"\xFF\xFBxx"), b"\xFF\xFBxx".to_vec());
        assert!(strip.done());
        assert_eq!(strip.feed(b"more"), b"more".to_vec());
    }

    #[test]
    fn strip_holds_ambiguous_prefix_until_decided() {
        let mut strip = MetadataStrip::new();
        // "ID" alone could still become "ID3"; nothing may be forwarded yet.
        assert!(strip.feed(b"ID").is_empty());
        assert!(!strip.done());
        // Next byte rules a tag out; the stash is released intact.
        assert_eq!(strip.feed(b"Q123"), b"IDQ123".to_vec());
        assert!(strip.done());
    }
}
