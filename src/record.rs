use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::level::Level;

/// Typed value of a structured field attached to a [`LogEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Duration(Duration),
    Map(BTreeMap<String, FieldValue>),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I64(i64::from(v))
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U64(u64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Duration> for FieldValue {
    fn from(v: Duration) -> Self {
        FieldValue::Duration(v)
    }
}

impl From<BTreeMap<String, FieldValue>> for FieldValue {
    fn from(v: BTreeMap<String, FieldValue>) -> Self {
        FieldValue::Map(v)
    }
}

/// Source location of a log call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub file: String,
    pub line: u32,
}

impl Caller {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Caller { file: file.into(), line }
    }

    /// `dir/file.rs:line`, keeping only the last directory of the path.
    pub fn short(&self) -> String {
        let path = self.file.replace('\\', "/");
        let trimmed = match path.rfind('/') {
            Some(last) => match path[..last].rfind('/') {
                Some(prev) => &path[prev + 1..],
                None => path.as_str(),
            },
            None => path.as_str(),
        };
        format!("{}:{}", trimmed, self.line)
    }

    pub fn full(&self) -> String {
        format!("{}:{}", self.file, self.line)
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One log occurrence, built by a facade and consumed by the encoder.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: Level,
    pub message: String,
    pub timestamp: DateTime<FixedOffset>,
    pub logger: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub caller: Option<Caller>,
    pub stacktrace: Option<String>,
}

impl LogEvent {
    /// Event stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        LogEvent {
            level,
            message: message.into(),
            timestamp: Utc::now().fixed_offset(),
            logger: None,
            fields: BTreeMap::new(),
            caller: None,
            stacktrace: None,
        }
    }

    /// Override the timestamp. Any timezone is accepted; the encoder
    /// normalizes to UTC.
    pub fn at<Tz: TimeZone>(mut self, timestamp: DateTime<Tz>) -> Self {
        self.timestamp = timestamp.fixed_offset();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_logger(mut self, name: impl Into<String>) -> Self {
        self.logger = Some(name.into());
        self
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = Some(stacktrace.into());
        self
    }
}
