use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::buffer::Batch;
use crate::error::DeliveryError;
use crate::retry::RetryPolicy;
use crate::stats::{DeliveryFailure, Stats};
use crate::transport::Transport;

tokio::task_local! {
    static DELIVERING: ();
}

/// Whether the current task is inside [`Transport::send`]. Facades use
/// this to drop events a transport emits while shipping a batch.
pub fn in_delivery() -> bool {
    DELIVERING.try_with(|_| ()).is_ok()
}

/// How a batch left the sink. Every variant returns the sink to idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Transient failures until the retry policy ran out.
    Exhausted { attempts: u32, error: DeliveryError },
    /// Permanent failure, not retried.
    Rejected { attempts: u32, error: DeliveryError },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Sends batches through a [`Transport`] with retry and backoff.
///
/// `Idle -> Sending -> {Delivered, Backoff -> Sending, Exhausted, Rejected} -> Idle`.
/// Terminal failures are counted in [`Stats`] and never returned to
/// the code that logged the records.
#[derive(Clone)]
pub struct DeliverySink {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    stats: Arc<Stats>,
}

impl DeliverySink {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, stats: Arc<Stats>) -> Self {
        Self {
            transport,
            policy,
            stats,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Deliver one batch, taking ownership of it.
    pub async fn deliver(&self, batch: Batch) -> DeliveryOutcome {
        let records = batch.len();
        let payload = batch.payload();
        drop(batch);

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            debug!(
                target: "tracing_hdx_sink::sink",
                attempts,
                records,
                bytes = payload.len(),
                "sending log batch"
            );

            let error = match DELIVERING.scope((), self.transport.send(&payload)).await {
                Ok(()) => {
                    self.stats.record_delivered(records);
                    debug!(target: "tracing_hdx_sink::sink", attempts, records, "log batch delivered");
                    return DeliveryOutcome::Delivered { attempts };
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                warn!(
                    target: "tracing_hdx_sink::sink",
                    records,
                    error = %error,
                    "collector rejected log batch, dropping it"
                );
                self.fail(records, attempts, error.clone());
                return DeliveryOutcome::Rejected { attempts, error };
            }

            match self.policy.next_delay(attempts, started.elapsed()) {
                Some(delay) => {
                    self.stats.record_retry();
                    debug!(
                        target: "tracing_hdx_sink::sink",
                        attempts,
                        error = %error,
                        "log batch send failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                None => {
                    warn!(
                        target: "tracing_hdx_sink::sink",
                        attempts,
                        records,
                        error = %error,
                        "retries exhausted, dropping log batch"
                    );
                    self.fail(records, attempts, error.clone());
                    return DeliveryOutcome::Exhausted { attempts, error };
                }
            }
        }
    }

    fn fail(&self, records: usize, attempts: u32, error: DeliveryError) {
        self.stats.record_failure(DeliveryFailure {
            records,
            attempts,
            error,
        });
    }
}
