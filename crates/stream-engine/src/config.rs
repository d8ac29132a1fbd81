use std::time::Duration;

/// Tuning parameters shared by the download/decode/playback stages.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Bytes per transport read and per pooled chunk.
    pub chunk_bytes: usize,
    /// Cap on compressed bytes resident in the stream buffer. The downloader
    /// blocks (never drops) when the buffer is full.
    pub max_buffer_bytes: usize,
    /// Compressed bytes to accumulate before the first decode attempt.
    pub min_start_bytes: usize,
    /// Minimum bytes the player asks the queue for on each refill.
    pub decode_low_water: usize,
    /// Free buffers retained by the chunk pool before releases start freeing.
    pub pool_max_free: usize,
    /// Cap on live (acquired, not yet released) chunks; acquisition beyond
    /// this fails and is treated as allocation exhaustion.
    pub pool_max_outstanding: usize,
    /// Consecutive bad bytes the decoder may skip while searching for frame
    /// sync before the stream is declared unrecoverable.
    pub resync_byte_limit: usize,
    /// Max PCM samples handed to the sink per write call.
    pub sink_burst_samples: usize,
    /// Consecutive transport read errors tolerated before the download fails.
    pub read_retry_limit: u32,
    /// Pause between transport read retries.
    pub read_retry_backoff: Duration,
    /// Consecutive chunk-allocation failures tolerated before the session
    /// is terminated.
    pub alloc_retry_limit: u32,
    /// Pause after a failed chunk allocation.
    pub alloc_backoff: Duration,
    /// Per-thread join bound during shutdown. Exceeding it fails the stop
    /// call rather than hanging the caller.
    pub join_timeout: Duration,
    /// How often the caption thread samples the playback clock.
    pub caption_poll_interval: Duration,
    /// Added to the clock when selecting the current caption, compensating
    /// for audio buffered downstream of the engine.
    pub caption_lead_ms: u64,
}

impl Default for EngineConfig {
    /// Defaults sized for compressed music streams in the 100-300 kbps range.
    fn default() -> Self {
        Self {
            chunk_bytes: 8 * 1024,
            max_buffer_bytes: 512 * 1024,
            min_start_bytes: 32 * 1024,
            decode_low_water: 4 * 1024,
            pool_max_free: 16,
            pool_max_outstanding: 128,
            resync_byte_limit: 8 * 1024,
            sink_burst_samples: 2048,
            read_retry_limit: 3,
            read_retry_backoff: Duration::from_millis(100),
            alloc_retry_limit: 8,
            alloc_backoff: Duration::from_millis(50),
            join_timeout: Duration::from_secs(3),
            caption_poll_interval: Duration::from_millis(50),
            caption_lead_ms: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = EngineConfig::default();
        assert!(cfg.min_start_bytes <= cfg.max_buffer_bytes);
        assert!(cfg.decode_low_water <= cfg.min_start_bytes);
        assert!(cfg.chunk_bytes <= cfg.max_buffer_bytes);
        assert!(cfg.pool_max_free <= cfg.pool_max_outstanding);
    }
}
