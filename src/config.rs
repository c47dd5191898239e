use std::fmt;
use std::sync::Arc;
use tokio::time::Duration;

use crate::buffer::BufferConfig;
use crate::encoder::{EncoderConfig, StaticAttributes, DEFAULT_TYPE};
use crate::env;
use crate::error::ConfigError;
use crate::level::Level;
use crate::mirror::DebugMirror;
use crate::retry::RetryPolicy;
use crate::stats::FailureHook;
use crate::transport::Transport;

#[cfg(feature = "http")]
pub use crate::http::{DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT};

#[cfg(not(feature = "http"))]
pub const DEFAULT_ENDPOINT: &str = "https://in.hyperdx.io";
#[cfg(not(feature = "http"))]
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Crates whose events are emitted by the HTTP transport itself. The
/// `tracing` layer ignores them so delivering a batch never produces
/// records for the next one.
pub const TRANSPORT_TARGETS: [&str; 6] = ["hyper", "hyper_util", "reqwest", "h2", "rustls", "want"];

/// Everything needed to build a [`Pipeline`](crate::pipeline::Pipeline).
///
/// Fields are public; the `with_*` methods are a shorthand and apply in
/// the order they are called, later calls overwriting earlier ones.
/// [`Config::validate`] runs when the pipeline is built.
///
/// **Fields**
/// - `token`: collector API key. Required unless `transport` is set.
/// - `endpoint`: collector URL for the built-in HTTP transport.
/// - `min_level`: events below this level are discarded by the facades.
/// - `encoder`: field names and value formats of each record.
/// - `type_tag`, `service_name`, `hostname`, `extra_static`: static
///   attributes written into every record.
/// - `transport`: replaces the HTTP transport built from `token`.
/// - `debug`: local mirror receiving a copy of every record.
/// - `buffer`: flush thresholds and capacity of the batch buffer.
/// - `retry`: backoff policy for transient delivery failures.
/// - `request_timeout`: per-request timeout of the HTTP transport.
/// - `max_in_flight`: batches delivered concurrently.
/// - `queue_batches`: flushed batches waiting for a delivery slot.
/// - `shutdown_grace`: how long shutdown waits for pending deliveries.
/// - `stacktrace_level`: capture a backtrace at this level and above.
/// - `on_failure`: called for every batch that is finally dropped.
/// - `ignored_targets`: crates whose `tracing` events the layer never
///   ships. Defaults to [`TRANSPORT_TARGETS`].
/// - `enable_stdout`: [`init_tracing`](crate::init::init_tracing) also
///   installs a `fmt` layer printing to the console.
#[derive(Clone)]
pub struct Config {
    pub token: Option<String>,
    pub endpoint: String,
    pub min_level: Level,
    pub encoder: EncoderConfig,
    pub type_tag: String,
    pub service_name: String,
    pub hostname: String,
    pub extra_static: Vec<(String, String)>,
    pub transport: Option<Arc<dyn Transport>>,
    pub debug: Option<Arc<DebugMirror>>,
    pub buffer: BufferConfig,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub max_in_flight: usize,
    pub queue_batches: usize,
    pub shutdown_grace: Duration,
    pub stacktrace_level: Option<Level>,
    pub on_failure: Option<FailureHook>,
    pub ignored_targets: Vec<String>,
    pub enable_stdout: bool,
}

impl Config {
    /// Defaults for `token`, with service name and host name captured
    /// from the environment now.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::bare()
        }
    }

    /// Defaults with a caller-supplied transport instead of a token.
    pub fn with_transport_only(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::bare()
        }
    }

    /// Read token, endpoint, level and service name from the environment.
    ///
    /// **Returns**
    /// - `Err(ConfigError::InvalidLevel { .. })` if `HDX_LOG_LEVEL` holds
    ///   an unknown level name.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::bare();
        config.token = env::env_opt(env::HYPERDX_API_KEY_ENV);
        if let Some(url) = env::env_opt(env::HYPERDX_URL_ENV) {
            config.endpoint = url;
        }
        if let Some(level) = env::env_opt(env::HDX_LOG_LEVEL_ENV) {
            config.min_level = level.parse()?;
        }
        Ok(config)
    }

    fn bare() -> Self {
        Self {
            token: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            min_level: Level::Info,
            encoder: EncoderConfig::default(),
            type_tag: DEFAULT_TYPE.to_string(),
            service_name: env::service_name(),
            hostname: env::hostname(),
            extra_static: Vec::new(),
            transport: None,
            debug: None,
            buffer: BufferConfig::default(),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_in_flight: 4,
            queue_batches: 8,
            shutdown_grace: Duration::from_secs(5),
            stacktrace_level: Some(Level::Error),
            on_failure: None,
            ignored_targets: TRANSPORT_TARGETS.iter().map(|t| t.to_string()).collect(),
            enable_stdout: false,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderConfig) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_debug(mut self, mirror: DebugMirror) -> Self {
        self.debug = Some(Arc::new(mirror));
        self
    }

    pub fn with_type(mut self, type_tag: impl Into<String>) -> Self {
        self.type_tag = type_tag.into();
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_static(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_static.push((key.into(), value.into()));
        self
    }

    pub fn with_buffer(mut self, buffer: BufferConfig) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_stacktrace_level(mut self, level: Option<Level>) -> Self {
        self.stacktrace_level = level;
        self
    }

    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Also ignore `tracing` events from crate `target`, e.g. the client
    /// library of a custom [`Transport`].
    pub fn with_ignored_target(mut self, target: impl Into<String>) -> Self {
        self.ignored_targets.push(target.into());
        self
    }

    pub fn with_stdout(mut self, enable: bool) -> Self {
        self.enable_stdout = enable;
        self
    }

    /// Static attributes as they will appear in every record.
    pub fn static_attributes(&self) -> StaticAttributes {
        self.extra_static.iter().fold(
            StaticAttributes::new(&*self.type_tag, &*self.service_name, &*self.hostname),
            |statics, (k, v)| statics.with_extra(k.as_str(), v.as_str()),
        )
    }

    /// Check the whole configuration without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encoder.validate(self.static_attributes().keys())?;
        if self.transport.is_none() {
            let token = self.token.as_deref().unwrap_or("");
            if token.trim().is_empty() {
                return Err(ConfigError::EmptyToken);
            }
            #[cfg(feature = "http")]
            crate::http::parse_endpoint(&self.endpoint)?;
        }
        Ok(())
    }

    /// The configured transport override, or an HTTP transport built from
    /// `token` and `endpoint`.
    pub fn build_transport(&self) -> Result<Arc<dyn Transport>, ConfigError> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }
        #[cfg(feature = "http")]
        {
            let token = self.token.as_deref().unwrap_or("");
            let transport =
                crate::http::HttpTransport::new(token, &self.endpoint, self.request_timeout)?;
            Ok(Arc::new(transport) as Arc<dyn Transport>)
        }
        #[cfg(not(feature = "http"))]
        {
            Err(ConfigError::NoTransport)
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("min_level", &self.min_level)
            .field("encoder", &self.encoder)
            .field("type_tag", &self.type_tag)
            .field("service_name", &self.service_name)
            .field("hostname", &self.hostname)
            .field("extra_static", &self.extra_static)
            .field("transport", &self.transport.is_some())
            .field("debug", &self.debug.is_some())
            .field("buffer", &self.buffer)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .field("max_in_flight", &self.max_in_flight)
            .field("queue_batches", &self.queue_batches)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("stacktrace_level", &self.stacktrace_level)
            .field("ignored_targets", &self.ignored_targets)
            .field("enable_stdout", &self.enable_stdout)
            .finish_non_exhaustive()
    }
}
