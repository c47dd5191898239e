use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::DeliveryError;

/// Terminal delivery failure handed to a [`FailureHook`].
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub records: usize,
    pub attempts: u32,
    pub error: DeliveryError,
}

/// Callback invoked from the delivery worker on every dropped batch.
pub type FailureHook = Arc<dyn Fn(&DeliveryFailure) + Send + Sync>;

/// Counters shared by producers, the buffer and the delivery worker.
///
/// Nothing in the pipeline raises errors to the caller after
/// construction; this is where drops and failures become visible.
#[derive(Default)]
pub struct Stats {
    accepted_records: AtomicU64,
    dropped_records: AtomicU64,
    flushed_batches: AtomicU64,
    delivered_batches: AtomicU64,
    delivered_records: AtomicU64,
    failed_batches: AtomicU64,
    failed_records: AtomicU64,
    retries: AtomicU64,
    mirror_errors: AtomicU64,
    last_error: Mutex<Option<String>>,
    hook: Option<FailureHook>,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted_records: u64,
    pub dropped_records: u64,
    /// Batches taken out of the buffer for delivery.
    pub flushed_batches: u64,
    pub delivered_batches: u64,
    pub delivered_records: u64,
    pub failed_batches: u64,
    pub failed_records: u64,
    pub retries: u64,
    pub mirror_errors: u64,
    pub last_error: Option<String>,
}

impl Stats {
    pub fn with_hook(hook: FailureHook) -> Self {
        Stats {
            hook: Some(hook),
            ..Stats::default()
        }
    }

    pub fn record_accepted(&self) {
        self.accepted_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, n: u64) {
        self.dropped_records.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_flushed(&self) {
        self.flushed_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, records: usize) {
        self.delivered_batches.fetch_add(1, Ordering::Relaxed);
        self.delivered_records.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mirror_error(&self) {
        self.mirror_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, failure: DeliveryFailure) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.failed_records.fetch_add(failure.records as u64, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(failure.error.to_string());
        if let Some(hook) = &self.hook {
            hook(&failure);
        }
    }

    pub fn dropped_records(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted_records: self.accepted_records.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            flushed_batches: self.flushed_batches.load(Ordering::Relaxed),
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            delivered_records: self.delivered_records.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            failed_records: self.failed_records.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            mirror_errors: self.mirror_errors.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl fmt::Debug for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stats")
            .field("snapshot", &self.snapshot())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
