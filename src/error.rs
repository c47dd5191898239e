/// Error returned when a logger cannot be constructed.
///
/// These are the only errors surfaced to application code; everything
/// after construction is fail-open and reported through
/// [`Stats`](crate::stats::Stats) instead.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("token is empty and no transport override was supplied")]
    EmptyToken,

    #[error("message key must not be empty")]
    EmptyMessageKey,

    #[error("message key {key:?} collides with a reserved or static key")]
    MessageKeyCollision { key: String },

    #[error("line ending must end with a newline")]
    InvalidLineEnding,

    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("unknown log level {value:?}")]
    InvalidLevel { value: String },

    #[error("a Tokio runtime is required to start the delivery worker")]
    NoRuntime,

    #[error("no transport supplied and the http feature is disabled")]
    NoTransport,

    #[error("a global tracing subscriber is already installed")]
    GlobalSubscriberSet,

    #[cfg(feature = "http")]
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure of a single delivery attempt, classified for the retry policy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network error, timeout, 5xx, 408 or 429. Worth retrying.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// 4xx or a malformed request. Retrying will not help.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Classify an HTTP status that was not a success.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("collector responded with status {}: {}", status, body);
        match status {
            408 | 429 | 500..=599 => DeliveryError::Transient(message),
            _ => DeliveryError::Permanent(message),
        }
    }
}
