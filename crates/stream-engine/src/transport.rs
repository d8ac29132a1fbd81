//! Network transport boundary.
//!
//! The engine only needs "open a URL, read bytes until EOF"; redirects and
//! retry policy belong to the caller's HTTP stack, not here. Tests swap in
//! in-memory transports.

use std::io::Read;
use std::time::Duration;

use crate::error::EngineError;

/// Opens remote resources as blocking byte streams.
pub trait Transport: Send + Sync {
    /// Open `url` for sequential reading.
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, EngineError>;

    /// Fetch a small text resource in one shot (caption files).
    fn fetch_text(&self, url: &str) -> Result<String, EngineError> {
        let mut reader = self.open(url)?;
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|e| EngineError::Network(format!("read {url}: {e}")))?;
        Ok(text)
    }
}

/// HTTP transport backed by `ureq`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    /// Per-call timeout; also bounds cancellation latency for a stalled read.
    pub timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, EngineError> {
        let resp = ureq::get(url)
            .config()
            .timeout_per_call(Some(self.timeout))
            .build()
            .header("User-Agent", "stream-engine/0.1")
            .header("Accept", "*/*")
            .call()
            .map_err(|e| EngineError::Network(format!("open {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::Network(format!(
                "GET {url} returned status {status}"
            )));
        }

        let (_, body) = resp.into_parts();
        Ok(Box::new(body.into_reader()))
    }
}
