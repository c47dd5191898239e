use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::level::Level;
use crate::pipeline::Pipeline;
use crate::record::{Caller, FieldValue, LogEvent};
use crate::sink;
use crate::trace;

/// `tracing_subscriber` layer that turns events into [`LogEvent`]s and
/// hands them to a [`Pipeline`].
///
/// Ignored events:
/// - below the pipeline's minimum level, and all `TRACE` events;
/// - the pipeline's own diagnostics and the transport crates listed in
///   [`Config::ignored_targets`](crate::config::Config::ignored_targets);
/// - anything emitted while a batch is being sent.
///
/// Encoding and buffering happen on the calling thread; network I/O
/// never does.
pub struct HdxLayer {
    pipeline: Arc<Pipeline>,
}

impl HdxLayer {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }
}

impl<S> Layer<S> for HdxLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() == tracing::Level::TRACE
            || self.pipeline.ignores_target(meta.target())
            || sink::in_delivery()
        {
            return;
        }
        let level = Level::from(*meta.level());
        if !self.pipeline.enabled(level) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        };
        event.record(&mut visitor);

        let mut record = LogEvent::new(level, message.unwrap_or_default()).with_logger(meta.target());
        record.fields = fields;
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            record.caller = Some(Caller::new(file, line));
        }
        record.stacktrace = self.pipeline.stacktrace_for(level);

        self.pipeline.log(&record, &trace::enrich_current());
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, FieldValue>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), FieldValue::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), FieldValue::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), FieldValue::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), FieldValue::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), FieldValue::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), FieldValue::Str(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use crate::config::Config;
    use crate::error::DeliveryError;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use tokio::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[derive(Default)]
    struct Capture(Mutex<Vec<Value>>);

    #[async_trait]
    impl Transport for Capture {
        async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError> {
            let text = String::from_utf8_lossy(payload);
            let mut records = self.0.lock().unwrap();
            for line in text.lines() {
                records.push(serde_json::from_str(line).unwrap());
            }
            Ok(())
        }
    }

    fn pipeline(capture: Arc<Capture>, level: Level) -> Arc<Pipeline> {
        let config = Config::with_transport_only(capture)
            .with_service_name("svc")
            .with_hostname("host")
            .with_level(level)
            .with_buffer(BufferConfig {
                flush_bytes: usize::MAX,
                flush_interval: Duration::from_secs(3600),
                ..BufferConfig::default()
            });
        Arc::new(Pipeline::new(config).unwrap())
    }

    #[tokio::test]
    async fn captures_message_fields_and_metadata() {
        let capture = Arc::new(Capture::default());
        let pipeline = pipeline(capture.clone(), Level::Info);
        let subscriber = Registry::default().with(HdxLayer::new(Arc::clone(&pipeline)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("too quiet");
            tracing::warn!(user_id = 42, ratio = 0.5, ok = false, reason = "locked", "login failed for {}", "bob");
        });
        pipeline.flush().await;

        let records = capture.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["message"], "login failed for bob");
        assert_eq!(record["level"], "warn");
        assert_eq!(record["logger"], module_path!());
        assert_eq!(record["user_id"], 42);
        assert_eq!(record["ratio"], 0.5);
        assert_eq!(record["ok"], false);
        assert_eq!(record["reason"], "locked");
        assert!(record["caller"].as_str().unwrap().starts_with("src/layer.rs:"));
        assert!(record.get("trace_id").is_none());
    }

    #[tokio::test]
    async fn ignores_internal_diagnostics() {
        let capture = Arc::new(Capture::default());
        let pipeline = pipeline(capture.clone(), Level::Debug);
        let subscriber = Registry::default().with(HdxLayer::new(Arc::clone(&pipeline)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "tracing_hdx_sink::sink", "retries exhausted");
            tracing::info!(target: "app", "kept");
        });
        pipeline.flush().await;

        let records = capture.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["logger"], "app");
    }

    #[tokio::test]
    async fn ignores_trace_level_and_transport_crates() {
        let capture = Arc::new(Capture::default());
        let pipeline = pipeline(capture.clone(), Level::Debug);
        let subscriber = Registry::default().with(HdxLayer::new(Arc::clone(&pipeline)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::trace!(target: "app", "too fine");
            tracing::debug!(target: "hyper::proto::h1::conn", "flushed 512 bytes");
            tracing::debug!(target: "reqwest::connect", "starting new connection");
            tracing::debug!(target: "hyperdrive", "not a transport crate");
        });
        pipeline.flush().await;

        let records = capture.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["logger"], "hyperdrive");
    }

    /// Emits an event of its own on every send, like an instrumented client.
    #[derive(Default)]
    struct Chatty {
        payloads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Chatty {
        async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError> {
            tracing::info!(target: "queue_client", bytes = payload.len(), "publishing batch");
            self.payloads
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_emitted_while_sending_are_not_shipped() {
        let transport = Arc::new(Chatty::default());
        let pipeline = Arc::new(
            Pipeline::new(
                Config::with_transport_only(transport.clone())
                    .with_service_name("svc")
                    .with_hostname("host")
                    .with_level(Level::Debug),
            )
            .unwrap(),
        );
        let subscriber = Registry::default().with(HdxLayer::new(Arc::clone(&pipeline)));
        let _guard = tracing::subscriber::set_default(subscriber);

        tracing::info!(target: "app", "order placed");
        for _ in 0..3 {
            pipeline.flush().await;
        }

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].contains("order placed"));
        assert!(!payloads[0].contains("publishing batch"));
        assert_eq!(pipeline.stats().accepted_records, 1);
    }
}
