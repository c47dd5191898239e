use async_trait::async_trait;

use crate::error::DeliveryError;

/// Destination for NDJSON batch payloads.
///
/// Implementations perform exactly one transmission per call; retries
/// and backoff belong to [`DeliverySink`](crate::sink::DeliverySink).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one batch payload to the collector.
    ///
    /// **Parameters**
    /// - `payload`: newline-delimited JSON records, in batch order.
    ///
    /// **Returns**
    /// - `Ok(())` if the collector accepted the payload.
    /// - `Err(DeliveryError::Transient(..))` for network errors, timeouts,
    ///   5xx, 408 and 429. The sink retries these with backoff.
    /// - `Err(DeliveryError::Permanent(..))` for anything retrying cannot
    ///   fix. The batch is dropped.
    ///
    /// Called from the background delivery worker, never from the thread
    /// that emitted the log event.
    async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError>;

    /// Flush anything the transport buffers internally. Called once at
    /// shutdown after the final batch. Default implementation is a no-op.
    async fn flush(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}
