use crate::error::DeliveryError;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// A transport that accepts and discards every payload.
///
/// Useful for measuring the overhead of the pipeline itself without any
/// network I/O, and for tests that don't care about delivery.
#[derive(Debug, Default)]
pub struct NoopTransport {
    payloads: AtomicU64,
    bytes: AtomicU64,
}

impl NoopTransport {
    /// Number of payloads discarded so far.
    pub fn payloads(&self) -> u64 {
        self.payloads.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for NoopTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError> {
        self.payloads.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}
