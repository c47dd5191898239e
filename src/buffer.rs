use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};
use tracing::warn;

use crate::encoder::EncodedRecord;
use crate::stats::Stats;

/// Flush thresholds and capacity limits for [`BatchBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Flush once the accumulated records reach this many bytes.
    pub flush_bytes: usize,
    /// Flush once the oldest pending record is this old. The delivery
    /// worker checks the age every quarter interval (at least every 10 ms),
    /// so on a quiet buffer a batch can leave up to `1.25 * flush_interval`
    /// after its oldest record. Busy buffers are checked on every accept.
    pub flush_interval: Duration,
    /// Maximum pending records before the oldest are dropped.
    pub max_records: usize,
    /// Maximum pending bytes before the oldest are dropped.
    pub max_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_bytes: 1024 * 1024,
            flush_interval: Duration::from_secs(5),
            max_records: 50_000,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

impl BufferConfig {
    /// Clamp degenerate values.
    fn normalized(mut self) -> Self {
        self.flush_bytes = self.flush_bytes.max(1);
        self.max_records = self.max_records.max(1);
        self.max_bytes = self.max_bytes.max(1);
        if self.flush_interval < Duration::from_millis(10) {
            self.flush_interval = Duration::from_millis(10);
        }
        self
    }
}

/// Records flushed together, in the order they were accepted.
#[derive(Debug, Clone)]
pub struct Batch {
    records: Vec<EncodedRecord>,
    bytes: usize,
    oldest: Instant,
}

impl Batch {
    pub fn records(&self) -> &[EncodedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total encoded size in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// When the oldest record of this batch was accepted.
    pub fn oldest(&self) -> Instant {
        self.oldest
    }

    /// NDJSON body: the records concatenated in insertion order.
    pub fn payload(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.bytes);
        for record in &self.records {
            body.extend_from_slice(record.as_bytes());
        }
        body
    }
}

#[derive(Default)]
struct Pending {
    records: VecDeque<(Instant, EncodedRecord)>,
    bytes: usize,
}

impl Pending {
    fn pop_oldest(&mut self) -> bool {
        match self.records.pop_front() {
            Some((_, record)) => {
                self.bytes -= record.len();
                true
            }
            None => false,
        }
    }

    fn take(&mut self) -> Option<Batch> {
        let oldest = self.records.front()?.0;
        let bytes = std::mem::take(&mut self.bytes);
        let records = self.records.drain(..).map(|(_, record)| record).collect();
        Some(Batch { records, bytes, oldest })
    }

    fn oldest_age(&self, now: Instant) -> Option<Duration> {
        self.records
            .front()
            .map(|(at, _)| now.saturating_duration_since(*at))
    }
}

/// Bounded accumulator of encoded records awaiting delivery.
///
/// A single mutex guards the pending queue; it is held only for the
/// append and the flush check, never across I/O.
pub struct BatchBuffer {
    config: BufferConfig,
    pending: Mutex<Pending>,
    stats: Arc<Stats>,
}

impl BatchBuffer {
    pub fn new(config: BufferConfig, stats: Arc<Stats>) -> Self {
        Self {
            config: config.normalized(),
            pending: Mutex::new(Pending::default()),
            stats,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one record. Returns `true` when the size or age threshold
    /// has been reached; the caller takes the batch with
    /// [`BatchBuffer::flush`] once it has somewhere to send it. Until then
    /// records stay here and the capacity limits apply.
    ///
    /// When the buffer is at capacity the oldest records are dropped and
    /// counted; this call never blocks on anything but the mutex.
    pub fn accept(&self, record: EncodedRecord, now: Instant) -> bool {
        if record.len() > self.config.max_bytes {
            self.stats.record_dropped(1);
            warn!(
                target: "tracing_hdx_sink::buffer",
                bytes = record.len(),
                "log record larger than buffer capacity, dropping"
            );
            return false;
        }

        let mut pending = self.lock();
        let mut dropped = 0u64;
        while pending.records.len() >= self.config.max_records
            || pending.bytes.saturating_add(record.len()) > self.config.max_bytes
        {
            if !pending.pop_oldest() {
                break;
            }
            dropped += 1;
        }

        pending.bytes += record.len();
        pending.records.push_back((now, record));

        let due = pending.bytes >= self.config.flush_bytes
            || pending
                .oldest_age(now)
                .is_some_and(|age| age >= self.config.flush_interval);
        drop(pending);

        if dropped > 0 {
            self.stats.record_dropped(dropped);
            warn!(
                target: "tracing_hdx_sink::buffer",
                dropped,
                "log buffer full, dropped oldest records"
            );
        }
        due
    }

    /// Take the pending records if the oldest has reached the flush interval.
    pub fn take_due(&self, now: Instant) -> Option<Batch> {
        let mut pending = self.lock();
        let batch = match pending.oldest_age(now) {
            Some(age) if age >= self.config.flush_interval => pending.take(),
            _ => None,
        };
        drop(pending);
        self.taken(batch)
    }

    /// Take whatever is pending, regardless of thresholds.
    pub fn flush(&self) -> Option<Batch> {
        let batch = self.lock().take();
        self.taken(batch)
    }

    fn taken(&self, batch: Option<Batch>) -> Option<Batch> {
        if batch.is_some() {
            self.stats.record_flushed();
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.lock().bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> EncodedRecord {
        EncodedRecord::from(format!("{{\"message\":\"{}\"}}\n", text).into_bytes())
    }

    fn buffer(config: BufferConfig) -> (BatchBuffer, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        (BatchBuffer::new(config, Arc::clone(&stats)), stats)
    }

    fn patient(flush_bytes: usize, max_records: usize) -> BufferConfig {
        BufferConfig {
            flush_bytes,
            flush_interval: Duration::from_secs(3600),
            max_records,
            max_bytes: usize::MAX,
        }
    }

    #[test]
    fn size_threshold_flushes_once_with_crossing_record() {
        // every record is 17 bytes: {"message":"rN"}\n
        let (buf, _) = buffer(patient(50, 100));
        let now = Instant::now();

        assert!(!buf.accept(record("r1"), now));
        assert!(!buf.accept(record("r2"), now));
        assert!(buf.accept(record("r3"), now), "third record crosses 50 bytes");
        let batch = buf.flush().unwrap();
        assert!(!buf.accept(record("r4"), now));

        let texts: Vec<_> = batch
            .records()
            .iter()
            .map(|r| String::from_utf8(r.as_bytes().to_vec()).unwrap())
            .collect();
        assert_eq!(texts.len(), 3);
        assert!(texts[0].contains("r1") && texts[1].contains("r2") && texts[2].contains("r3"));
        assert_eq!(batch.bytes(), 51);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let (buf, stats) = buffer(patient(usize::MAX, 10));
        let now = Instant::now();
        for i in 0..15 {
            assert!(!buf.accept(record(&format!("r{i}")), now));
        }
        assert_eq!(buf.len(), 10);
        assert!(stats.dropped_records() >= 5);

        let batch = buf.flush().unwrap();
        let first = String::from_utf8(batch.records()[0].as_bytes().to_vec()).unwrap();
        assert!(first.contains("r5"));
    }

    #[test]
    fn byte_capacity_is_enforced() {
        let (buf, stats) = buffer(BufferConfig {
            flush_bytes: usize::MAX,
            flush_interval: Duration::from_secs(3600),
            max_records: 1000,
            max_bytes: 40,
        });
        let now = Instant::now();
        buf.accept(record("a1"), now);
        buf.accept(record("a2"), now);
        buf.accept(record("a3"), now);
        assert_eq!(buf.len(), 2);
        assert!(buf.bytes() <= 40);
        assert_eq!(stats.dropped_records(), 1);
    }

    #[test]
    fn oversized_record_is_dropped() {
        let (buf, stats) = buffer(BufferConfig {
            max_bytes: 10,
            ..patient(usize::MAX, 10)
        });
        assert!(!buf.accept(record("too long for ten bytes"), Instant::now()));
        assert!(buf.is_empty());
        assert_eq!(stats.dropped_records(), 1);
    }

    #[test]
    fn age_threshold() {
        let (buf, _) = buffer(BufferConfig {
            flush_interval: Duration::from_secs(5),
            ..patient(usize::MAX, 100)
        });
        let start = Instant::now();
        buf.accept(record("old"), start);
        assert!(buf.take_due(start + Duration::from_secs(4)).is_none());
        let batch = buf.take_due(start + Duration::from_secs(5)).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(buf.take_due(start + Duration::from_secs(60)).is_none());

        assert!(!buf.accept(record("first"), start));
        assert!(
            buf.accept(record("late"), start + Duration::from_secs(6)),
            "oldest record is past the interval"
        );
        let batch = buf.flush().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.oldest(), start);
    }

    #[test]
    fn explicit_flush_and_payload() {
        let (buf, _) = buffer(patient(usize::MAX, 100));
        assert!(buf.flush().is_none());
        let now = Instant::now();
        buf.accept(record("x"), now);
        buf.accept(record("y"), now);
        let batch = buf.flush().unwrap();
        assert_eq!(
            batch.payload(),
            b"{\"message\":\"x\"}\n{\"message\":\"y\"}\n".to_vec()
        );
        assert!(buf.is_empty());
        assert_eq!(buf.bytes(), 0);
    }

    #[test]
    fn due_buffer_keeps_records_until_taken() {
        let (buf, stats) = buffer(patient(1, 3));
        let now = Instant::now();
        for name in ["a", "b", "c", "d", "e"] {
            assert!(buf.accept(record(name), now));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(stats.dropped_records(), 2);
        assert_eq!(stats.snapshot().flushed_batches, 0);

        let texts: Vec<_> = buf
            .flush()
            .unwrap()
            .records()
            .iter()
            .map(|r| String::from_utf8(r.as_bytes().to_vec()).unwrap())
            .collect();
        assert!(texts[0].contains("\"c\""));
        assert!(texts[2].contains("\"e\""));
        assert_eq!(stats.snapshot().flushed_batches, 1);
    }

    #[test]
    fn concurrent_producers_lose_nothing_below_capacity() {
        let (buf, stats) = buffer(patient(usize::MAX, 10_000));
        let buf = Arc::new(buf);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let buf = Arc::clone(&buf);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buf.accept(record(&format!("{t}-{i}")), Instant::now());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buf.len(), 800);
        assert_eq!(stats.dropped_records(), 0);
    }
}
