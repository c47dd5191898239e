use opentelemetry::Context;
use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ConfigError;
use crate::level::Level;
use crate::pipeline::Pipeline;
use crate::record::{Caller, FieldValue, LogEvent};
use crate::sink;
use crate::stats::StatsSnapshot;
use crate::trace::{self, TraceFields};

/// Direct logging facade over a [`Pipeline`], for code that does not go
/// through `tracing`.
///
/// Child loggers created with [`Logger::named`], [`Logger::with_fields`] or
/// [`Logger::with_trace_metadata`] share the parent's pipeline.
#[derive(Clone)]
pub struct Logger {
    pipeline: Arc<Pipeline>,
    name: Option<String>,
    fields: Arc<BTreeMap<String, FieldValue>>,
    trace: Arc<TraceFields>,
}

impl Logger {
    /// Build a pipeline from `config` and wrap it.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Ok(Self::from_pipeline(Arc::new(Pipeline::new(config)?)))
    }

    pub fn from_pipeline(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            name: None,
            fields: Arc::new(BTreeMap::new()),
            trace: Arc::new(TraceFields::empty()),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Child logger; names nest with a dot (`api.auth`).
    pub fn named(&self, name: &str) -> Self {
        let name = match &self.name {
            Some(parent) => format!("{}.{}", parent, name),
            None => name.to_string(),
        };
        Self {
            name: Some(name),
            ..self.clone()
        }
    }

    /// Child logger that adds `fields` to every event. Fields passed at
    /// the call site still win over these.
    pub fn with_fields<I, K, V>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut merged = (*self.fields).clone();
        merged.extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self {
            fields: Arc::new(merged),
            ..self.clone()
        }
    }

    /// Child logger carrying `trace_id`, `span_id` and `trace_flags` of the
    /// span active in `cx`. Returns an unchanged clone when there is none.
    pub fn with_trace_metadata(&self, cx: &Context) -> Self {
        let trace = trace::enrich(cx);
        if trace.is_empty() {
            return self.clone();
        }
        Self {
            trace: Arc::new(trace),
            ..self.clone()
        }
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.pipeline.enabled(level)
    }

    /// Log `message` at `level` with extra `fields`.
    #[track_caller]
    pub fn log<I, K, V>(&self, level: Level, message: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        if !self.enabled(level) || sink::in_delivery() {
            return;
        }
        let location = Location::caller();
        let mut event = LogEvent::new(level, message)
            .with_caller(Caller::new(location.file(), location.line()));
        event.logger = self.name.clone();
        event.fields = (*self.fields).clone();
        event
            .fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        event.stacktrace = self.pipeline.stacktrace_for(level);
        self.pipeline.log(&event, &self.trace);
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message, no_fields());
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message, no_fields());
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message, no_fields());
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message, no_fields());
    }

    /// Logs at fatal level. Unlike some loggers this does not exit the
    /// process; call [`Logger::shutdown`] first if you are about to.
    #[track_caller]
    pub fn fatal(&self, message: impl Into<String>) {
        self.log(Level::Fatal, message, no_fields());
    }

    pub async fn flush(&self) {
        self.pipeline.flush().await;
    }

    pub async fn shutdown(&self) -> bool {
        self.pipeline.shutdown().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats()
    }
}

fn no_fields() -> [(&'static str, FieldValue); 0] {
    []
}
