use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::record::{FieldValue, LogEvent};
use crate::trace::TraceFields;

/// Canonical names of the entries every record may carry. The message
/// key is not allowed to shadow any of them.
pub const RESERVED_KEYS: [&str; 5] = ["ts", "level", "logger", "caller", "stacktrace"];

/// Static key carrying the record type tag.
pub const TYPE_KEY: &str = "type";
/// Static key the collector reads the service name from.
pub const SERVICE_NAME_KEY: &str = "__hdx_sv";
/// Static key the collector reads the host name from.
pub const HOST_KEY: &str = "__hdx_h";

pub const DEFAULT_TYPE: &str = "tracing-logger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelFormat {
    #[default]
    Lowercase,
    Capital,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    /// `2024-05-01T12:00:00.000000001Z`, always nine fractional digits.
    #[default]
    Rfc3339Nanos,
    /// Fractional seconds since the Unix epoch.
    EpochSeconds,
    /// Fractional milliseconds since the Unix epoch.
    EpochMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationFormat {
    /// Fractional seconds.
    #[default]
    Seconds,
    /// Fractional milliseconds.
    Millis,
    /// Integer nanoseconds.
    Nanos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallerFormat {
    #[default]
    Short,
    Full,
}

/// Field-name mapping and formatting rules shared by every encode call.
///
/// An empty key for time, level, name, caller or stacktrace omits that
/// entry from the output entirely. The message key is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub time_key: String,
    pub level_key: String,
    pub name_key: String,
    pub caller_key: String,
    pub message_key: String,
    pub stacktrace_key: String,
    pub line_ending: String,
    pub level_format: LevelFormat,
    pub time_format: TimeFormat,
    pub duration_format: DurationFormat,
    pub caller_format: CallerFormat,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            time_key: "ts".to_string(),
            level_key: "level".to_string(),
            name_key: "logger".to_string(),
            caller_key: "caller".to_string(),
            message_key: "message".to_string(),
            stacktrace_key: "stacktrace".to_string(),
            line_ending: "\n".to_string(),
            level_format: LevelFormat::Lowercase,
            time_format: TimeFormat::Rfc3339Nanos,
            duration_format: DurationFormat::Seconds,
            caller_format: CallerFormat::Short,
        }
    }
}

impl EncoderConfig {
    /// Check the message key against the reserved keys, the configured
    /// keys and the supplied static attribute keys.
    pub fn validate<'a>(
        &self,
        static_keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        let message = self.message_key.as_str();
        if message.is_empty() {
            return Err(ConfigError::EmptyMessageKey);
        }
        if !self.line_ending.ends_with('\n') {
            return Err(ConfigError::InvalidLineEnding);
        }

        let configured = [
            self.time_key.as_str(),
            self.level_key.as_str(),
            self.name_key.as_str(),
            self.caller_key.as_str(),
            self.stacktrace_key.as_str(),
        ];
        let collides = RESERVED_KEYS.contains(&message)
            || configured.contains(&message)
            || static_keys.into_iter().any(|k| k == message);
        if collides {
            return Err(ConfigError::MessageKeyCollision { key: message.to_string() });
        }
        Ok(())
    }
}

/// Key/value pairs attached to every record of one logger instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAttributes {
    entries: Vec<(String, String)>,
}

impl StaticAttributes {
    pub fn new(
        type_tag: impl Into<String>,
        service_name: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        StaticAttributes {
            entries: vec![
                (TYPE_KEY.to_string(), type_tag.into()),
                (SERVICE_NAME_KEY.to_string(), service_name.into()),
                (HOST_KEY.to_string(), hostname.into()),
            ],
        }
    }

    /// Capture service name and hostname from the process environment.
    pub fn detect(type_tag: impl Into<String>) -> Self {
        StaticAttributes::new(
            type_tag,
            crate::env::service_name(),
            crate::env::hostname(),
        )
    }

    /// Add one more static pair. An existing key is overwritten.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One JSON object followed by the configured line ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    bytes: Vec<u8>,
}

impl EncodedRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for EncodedRecord {
    fn from(bytes: Vec<u8>) -> Self {
        EncodedRecord { bytes }
    }
}

/// Turns [`LogEvent`]s into [`EncodedRecord`]s.
///
/// Cloning is cheap; configuration and static attributes are shared
/// read-only across threads.
#[derive(Debug, Clone)]
pub struct Encoder {
    config: Arc<EncoderConfig>,
    statics: Arc<StaticAttributes>,
}

impl Encoder {
    pub fn new(config: EncoderConfig, statics: StaticAttributes) -> Result<Self, ConfigError> {
        config.validate(statics.keys())?;
        Ok(Encoder {
            config: Arc::new(config),
            statics: Arc::new(statics),
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn statics(&self) -> &StaticAttributes {
        &self.statics
    }

    /// Encode one event. Never fails: values JSON cannot represent are
    /// written as strings.
    ///
    /// Layout: reserved entries first, then static attributes, trace
    /// fields and event fields. Later layers overwrite equal keys in place.
    pub fn encode(&self, event: &LogEvent, trace: &TraceFields) -> EncodedRecord {
        let cfg = &*self.config;
        let mut map = Map::new();

        if !cfg.time_key.is_empty() {
            map.insert(cfg.time_key.clone(), self.encode_time(event));
        }
        if !cfg.level_key.is_empty() {
            let level = match cfg.level_format {
                LevelFormat::Lowercase => event.level.as_str(),
                LevelFormat::Capital => event.level.as_capital_str(),
            };
            map.insert(cfg.level_key.clone(), Value::from(level));
        }
        if let (false, Some(name)) = (cfg.name_key.is_empty(), &event.logger) {
            map.insert(cfg.name_key.clone(), Value::from(name.as_str()));
        }
        if let (false, Some(caller)) = (cfg.caller_key.is_empty(), &event.caller) {
            let rendered = match cfg.caller_format {
                CallerFormat::Short => caller.short(),
                CallerFormat::Full => caller.full(),
            };
            map.insert(cfg.caller_key.clone(), Value::from(rendered));
        }
        map.insert(cfg.message_key.clone(), Value::from(event.message.as_str()));
        if let (false, Some(stack)) = (cfg.stacktrace_key.is_empty(), &event.stacktrace) {
            map.insert(cfg.stacktrace_key.clone(), Value::from(stack.as_str()));
        }

        for (key, value) in self.statics.iter() {
            map.insert(key.to_string(), Value::from(value));
        }
        for (key, value) in trace.iter() {
            map.insert(key.to_string(), Value::from(value));
        }
        for (key, value) in &event.fields {
            map.insert(key.clone(), self.encode_value(value));
        }

        let mut bytes = Vec::with_capacity(256);
        if let Err(e) = serde_json::to_writer(&mut bytes, &Value::Object(map)) {
            bytes = fallback_record(&cfg.message_key, &e.to_string());
        }
        bytes.extend_from_slice(cfg.line_ending.as_bytes());
        EncodedRecord { bytes }
    }

    fn encode_time(&self, event: &LogEvent) -> Value {
        let ts = event.timestamp.with_timezone(&Utc);
        match self.config.time_format {
            TimeFormat::Rfc3339Nanos => Value::from(ts.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            TimeFormat::EpochSeconds => {
                let secs = ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9;
                float_value(secs)
            }
            TimeFormat::EpochMillis => {
                let millis = ts.timestamp_millis() as f64
                    + f64::from(ts.timestamp_subsec_nanos() % 1_000_000) / 1e6;
                float_value(millis)
            }
        }
    }

    fn encode_duration(&self, d: Duration) -> Value {
        match self.config.duration_format {
            DurationFormat::Seconds => float_value(d.as_secs_f64()),
            DurationFormat::Millis => float_value(d.as_secs_f64() * 1e3),
            DurationFormat::Nanos => Value::from(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)),
        }
    }

    fn encode_value(&self, value: &FieldValue) -> Value {
        match value {
            FieldValue::Str(s) => Value::from(s.as_str()),
            FieldValue::I64(i) => Value::from(*i),
            FieldValue::U64(u) => Value::from(*u),
            FieldValue::F64(f) => float_value(*f),
            FieldValue::Bool(b) => Value::from(*b),
            FieldValue::Duration(d) => self.encode_duration(*d),
            FieldValue::Map(nested) => Value::Object(
                nested
                    .iter()
                    .map(|(k, v)| (k.clone(), self.encode_value(v)))
                    .collect(),
            ),
        }
    }
}

/// JSON has no NaN or infinities; those become strings.
fn float_value(f: f64) -> Value {
    match Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None if f.is_nan() => Value::from("NaN"),
        None if f > 0.0 => Value::from("+Inf"),
        None => Value::from("-Inf"),
    }
}

fn fallback_record(message_key: &str, reason: &str) -> Vec<u8> {
    let mut map = Map::new();
    map.insert(
        message_key.to_string(),
        Value::from(format!("failed to encode log event: {}", reason)),
    );
    serde_json::to_vec(&Value::Object(map)).unwrap_or_default()
}
