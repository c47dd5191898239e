//! Wiring of encoder, batch buffer, debug mirror and the background
//! delivery worker.
//!
//! ```text
//!  producer thread                        delivery worker (tokio task)
//!  ---------------                        ----------------------------
//!  encode -> mirror -> buffer.accept --try_reserve--> spawn deliver() (<= max_in_flight)
//!                         |                              |
//!                         +- stays buffered when full    +-- retry/backoff
//!                                                 ticker -> buffer.take_due()
//! ```

use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::buffer::{Batch, BatchBuffer};
use crate::config::Config;
use crate::encoder::{EncodedRecord, Encoder};
use crate::error::ConfigError;
use crate::level::Level;
use crate::mirror::DebugMirror;
use crate::record::LogEvent;
use crate::sink::DeliverySink;
use crate::stats::{Stats, StatsSnapshot};
use crate::trace::TraceFields;

/// Target prefix of the pipeline's own diagnostics. Facades skip events
/// with this target so the pipeline never ships its own logs.
pub const INTERNAL_TARGET: &str = "tracing_hdx_sink";

enum Command {
    Deliver(Batch),
    /// Deliver `batch`, wait for everything in flight, then ack.
    Flush {
        batch: Option<Batch>,
        done: oneshot::Sender<()>,
    },
    /// Like `Flush`, then stop the worker.
    Shutdown {
        batch: Option<Batch>,
        done: oneshot::Sender<()>,
    },
}

/// Encode-buffer-deliver pipeline for one collector.
///
/// `log` and `dispatch` are synchronous and never wait on the network;
/// delivery runs on a Tokio task spawned at construction.
pub struct Pipeline {
    encoder: Encoder,
    buffer: Arc<BatchBuffer>,
    mirror: Option<Arc<DebugMirror>>,
    stats: Arc<Stats>,
    min_level: Level,
    stacktrace_level: Option<Level>,
    ignored_targets: Vec<String>,
    shutdown_grace: Duration,
    commands: mpsc::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Pipeline {
    /// Validate `config`, build the transport and start the delivery
    /// worker on the current Tokio runtime.
    ///
    /// **Returns**
    /// - `Err(ConfigError::NoRuntime)` when called outside a runtime.
    /// - any validation error of [`Config::validate`].
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let stats = Arc::new(match config.on_failure.clone() {
            Some(hook) => Stats::with_hook(hook),
            None => Stats::default(),
        });
        let encoder = Encoder::new(config.encoder.clone(), config.static_attributes())?;
        let transport = config.build_transport()?;
        let sink = DeliverySink::new(transport, config.retry, Arc::clone(&stats));
        let buffer = Arc::new(BatchBuffer::new(config.buffer.clone(), Arc::clone(&stats)));

        let (tx, rx) = mpsc::channel(config.queue_batches.max(1));
        let tick = (buffer.config().flush_interval / 4).max(Duration::from_millis(10));
        let worker = Worker {
            commands: rx,
            sink,
            buffer: Arc::clone(&buffer),
            max_in_flight: config.max_in_flight.max(1),
            in_flight: JoinSet::new(),
        };
        let handle = runtime.spawn(worker.run(tick));

        Ok(Self {
            encoder,
            buffer,
            mirror: config.debug.clone(),
            stats,
            min_level: config.min_level,
            stacktrace_level: config.stacktrace_level,
            ignored_targets: config.ignored_targets.clone(),
            shutdown_grace: config.shutdown_grace,
            commands: tx,
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    /// Whether `tracing` events with `target` must not be shipped: the
    /// pipeline's own diagnostics and the configured transport crates.
    pub fn ignores_target(&self, target: &str) -> bool {
        if target.starts_with(INTERNAL_TARGET) {
            return true;
        }
        let krate = target.split("::").next().unwrap_or(target);
        self.ignored_targets.iter().any(|ignored| ignored == krate)
    }

    pub fn min_level(&self) -> Level {
        self.min_level
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn buffer(&self) -> &BatchBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// A backtrace for events at or above the configured stacktrace level.
    pub fn stacktrace_for(&self, level: Level) -> Option<String> {
        match self.stacktrace_level {
            Some(min) if level >= min => Some(Backtrace::force_capture().to_string()),
            _ => None,
        }
    }

    /// Encode `event` with `trace` fields and queue it. Level filtering is
    /// the caller's job; see [`Pipeline::enabled`].
    pub fn log(&self, event: &LogEvent, trace: &TraceFields) {
        let record = self.encoder.encode(event, trace);
        self.dispatch(record);
    }

    /// Queue an already encoded record.
    pub fn dispatch(&self, record: EncodedRecord) {
        if self.closed.load(Ordering::Acquire) {
            self.stats.record_dropped(1);
            return;
        }
        self.stats.record_accepted();
        if let Some(mirror) = &self.mirror {
            if !mirror.write(&record) {
                self.stats.record_mirror_error();
            }
        }
        if self.buffer.accept(record, Instant::now()) {
            self.hand_off();
        }
    }

    /// Move the pending records to the worker if its queue has a free
    /// slot. Otherwise they stay in the buffer, bounded by drop-oldest,
    /// and go with a later hand-off or the worker's age check.
    fn hand_off(&self) {
        let Ok(permit) = self.commands.try_reserve() else {
            return;
        };
        if let Some(batch) = self.buffer.flush() {
            permit.send(Command::Deliver(batch));
        }
    }

    /// Deliver everything pending and wait until all batches handed to
    /// the worker so far have reached a terminal outcome.
    pub async fn flush(&self) {
        let batch = self.buffer.flush();
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Flush { batch, done }).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Flush and stop the worker, waiting at most the configured grace
    /// period. Returns `false` when pending deliveries were abandoned.
    /// Records logged afterwards are counted as dropped.
    pub async fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return true;
        }
        let batch = self.buffer.flush();
        let (done, wait) = oneshot::channel();
        let drain = async {
            if self.commands.send(Command::Shutdown { batch, done }).await.is_ok() {
                let _ = wait.await;
            }
        };

        match timeout(self.shutdown_grace, drain).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    target: "tracing_hdx_sink::pipeline",
                    grace = ?self.shutdown_grace,
                    "shutdown grace period elapsed, abandoning pending log batches"
                );
                let handle = self
                    .worker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(handle) = handle {
                    handle.abort();
                }
                false
            }
        }
    }
}

struct Worker {
    commands: mpsc::Receiver<Command>,
    sink: DeliverySink,
    buffer: Arc<BatchBuffer>,
    max_in_flight: usize,
    in_flight: JoinSet<()>,
}

impl Worker {
    async fn run(mut self, tick: Duration) {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Deliver(batch)) => self.start(batch).await,
                    Some(Command::Flush { batch, done }) => {
                        if let Some(batch) = batch {
                            self.start(batch).await;
                        }
                        self.drain().await;
                        let _ = done.send(());
                    }
                    Some(Command::Shutdown { batch, done }) => {
                        self.finish(batch).await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        // every pipeline handle is gone
                        let batch = self.buffer.flush();
                        self.finish(batch).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if let Some(batch) = self.buffer.take_due(Instant::now()) {
                        self.start(batch).await;
                    }
                }
                Some(_) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {}
            }
        }
    }

    /// Spawn delivery of `batch`, first waiting for a free slot.
    async fn start(&mut self, batch: Batch) {
        while self.in_flight.len() >= self.max_in_flight {
            if self.in_flight.join_next().await.is_none() {
                break;
            }
        }
        let sink = self.sink.clone();
        self.in_flight.spawn(async move {
            sink.deliver(batch).await;
        });
    }

    async fn drain(&mut self) {
        while self.in_flight.join_next().await.is_some() {}
    }

    async fn finish(&mut self, batch: Option<Batch>) {
        if let Some(batch) = batch {
            self.start(batch).await;
        }
        // records that stayed buffered while the queue was full
        if let Some(batch) = self.buffer.flush() {
            self.start(batch).await;
        }
        self.drain().await;
        if let Err(e) = self.sink.transport().flush().await {
            warn!(target: "tracing_hdx_sink::pipeline", error = %e, "transport flush failed at shutdown");
        }
        debug!(target: "tracing_hdx_sink::pipeline", "delivery worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use crate::error::DeliveryError;
    use crate::noop_transport::NoopTransport;
    use crate::retry::RetryPolicy;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` sends, records every successful payload.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        delivered: Mutex<Vec<String>>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(DeliveryError::Transient("connection reset".to_string()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        }
    }

    fn config(transport: Arc<dyn Transport>) -> Config {
        Config::with_transport_only(transport)
            .with_service_name("svc")
            .with_hostname("host")
            .with_buffer(BufferConfig {
                flush_bytes: usize::MAX,
                flush_interval: Duration::from_secs(3600),
                max_records: 1000,
                max_bytes: usize::MAX,
            })
    }

    #[test]
    fn requires_a_runtime() {
        let result = Pipeline::new(config(Arc::new(NoopTransport::default())));
        assert!(matches!(result, Err(ConfigError::NoRuntime)));
    }

    #[tokio::test]
    async fn flush_delivers_records_in_order() {
        let transport = FlakyTransport::new(0);
        let pipeline = Pipeline::new(config(transport.clone())).unwrap();

        for i in 0..3 {
            pipeline.log(
                &LogEvent::new(Level::Info, format!("event {i}")),
                &TraceFields::empty(),
            );
        }
        pipeline.flush().await;

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let lines: Vec<&str> = delivered[0].lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("event 0"));
        assert!(lines[2].contains("event 2"));
        assert_eq!(pipeline.stats().delivered_records, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn producer_is_not_blocked_by_backoff() {
        let transport = FlakyTransport::new(3);
        let pipeline = Pipeline::new(
            config(transport.clone())
                .with_buffer(BufferConfig {
                    flush_bytes: 1,
                    flush_interval: Duration::from_secs(3600),
                    max_records: 1000,
                    max_bytes: usize::MAX,
                })
                .with_retry(RetryPolicy {
                    max_attempts: 5,
                    initial_backoff: Duration::from_millis(300),
                    max_backoff: Duration::from_secs(2),
                    max_elapsed: Duration::from_secs(30),
                }),
        )
        .unwrap();

        pipeline.log(&LogEvent::new(Level::Error, "payment failed"), &TraceFields::empty());
        // let the first batch fail and enter backoff
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        for i in 0..10 {
            pipeline.log(&LogEvent::new(Level::Info, format!("after {i}")), &TraceFields::empty());
        }
        // cumulative backoff of the first batch is 300 + 600 + 1200 ms
        assert!(started.elapsed() < Duration::from_millis(250));

        pipeline.flush().await;
        let delivered = transport.delivered.lock().unwrap();
        let first = delivered
            .iter()
            .filter(|payload| payload.contains("payment failed"))
            .count();
        assert_eq!(first, 1);
        let lines: usize = delivered.iter().map(|payload| payload.lines().count()).sum();
        assert_eq!(lines, 11);
        assert_eq!(
            transport.calls.load(Ordering::SeqCst) as usize,
            delivered.len() + 3
        );
    }

    #[tokio::test]
    async fn full_queue_leaves_records_buffered_without_draining() {
        struct Stuck;

        #[async_trait]
        impl Transport for Stuck {
            async fn send(&self, _payload: &[u8]) -> Result<(), DeliveryError> {
                std::future::pending().await
            }
        }

        let mut cfg = config(Arc::new(Stuck)).with_buffer(BufferConfig {
            flush_bytes: 1,
            flush_interval: Duration::from_secs(3600),
            max_records: 5,
            max_bytes: usize::MAX,
        });
        cfg.max_in_flight = 1;
        cfg.queue_batches = 1;
        let pipeline = Pipeline::new(cfg).unwrap();

        for i in 0..50 {
            pipeline.log(&LogEvent::new(Level::Info, format!("e{i}")), &TraceFields::empty());
            tokio::task::yield_now().await;
        }

        // one batch in flight, one waiting for a slot, one queued
        let stats = pipeline.stats();
        assert!(stats.flushed_batches <= 3, "{stats:?}");
        assert_eq!(pipeline.buffer().len(), 5);
        // at most three batches of at most five records left the buffer
        assert!(stats.dropped_records >= 50 - 5 - 3 * 5, "{stats:?}");

        let newest = pipeline.buffer().flush().unwrap();
        let last = String::from_utf8(newest.records()[4].as_bytes().to_vec()).unwrap();
        assert!(last.contains("e49"));
    }

    #[tokio::test]
    async fn shutdown_delivers_pending_record() {
        let transport = FlakyTransport::new(0);
        let pipeline = Pipeline::new(
            config(transport.clone()).with_shutdown_grace(Duration::from_secs(2)),
        )
        .unwrap();
        pipeline.log(&LogEvent::new(Level::Warn, "last words"), &TraceFields::empty());

        assert!(pipeline.shutdown().await);
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);

        pipeline.log(&LogEvent::new(Level::Warn, "too late"), &TraceFields::empty());
        assert_eq!(pipeline.stats().dropped_records, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_after_grace() {
        let transport = FlakyTransport::new(u32::MAX);
        let pipeline = Pipeline::new(
            config(transport.clone())
                .with_shutdown_grace(Duration::from_millis(500))
                .with_retry(RetryPolicy {
                    max_attempts: 100,
                    initial_backoff: Duration::from_secs(1),
                    max_backoff: Duration::from_secs(1),
                    max_elapsed: Duration::from_secs(3600),
                }),
        )
        .unwrap();
        pipeline.log(&LogEvent::new(Level::Info, "unlucky"), &TraceFields::empty());

        assert!(!pipeline.shutdown().await);
        assert!(transport.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn age_threshold_flushes_in_background() {
        let transport = FlakyTransport::new(0);
        let pipeline = Pipeline::new(config(transport.clone()).with_buffer(BufferConfig {
            flush_bytes: usize::MAX,
            flush_interval: Duration::from_secs(5),
            max_records: 1000,
            max_bytes: usize::MAX,
        }))
        .unwrap();
        pipeline.log(&LogEvent::new(Level::Info, "slow trickle"), &TraceFields::empty());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(transport.delivered.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stacktrace_only_at_configured_level() {
        let pipeline = Pipeline::new(config(Arc::new(NoopTransport::default()))).unwrap();
        assert!(pipeline.stacktrace_for(Level::Warn).is_none());
        assert!(pipeline.stacktrace_for(Level::Error).is_some());
        assert!(pipeline.stacktrace_for(Level::Fatal).is_some());
    }
}
