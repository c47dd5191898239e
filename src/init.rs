use crate::config::Config;
use crate::error::ConfigError;
use crate::layer::HdxLayer;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Initialize the global `tracing` subscriber with an [`HdxLayer`] built
/// from `config`.
///
/// **Parameters**
/// - `config`: [`Config`] describing token, encoding, buffering and
///   delivery.
///
/// **Returns**
/// - The [`Pipeline`] behind the layer. Keep it to call
///   [`Pipeline::flush`] or [`Pipeline::shutdown`] before the process
///   exits; records still buffered at that point are otherwise lost.
/// - `Err(ConfigError)` if the configuration is invalid, no tokio runtime
///   is running, or a global subscriber is already installed.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`HdxLayer`] as the global
/// default subscriber. With `config.enable_stdout`, a
/// `tracing_subscriber::fmt` layer is added so events are also printed
/// to the console.
pub fn init_tracing(config: Config) -> Result<Arc<Pipeline>, ConfigError> {
    let enable_stdout = config.enable_stdout;
    let pipeline = Arc::new(Pipeline::new(config)?);
    let layer = HdxLayer::new(Arc::clone(&pipeline));

    // Two subscriber shapes, one per branch, since the types differ.
    let installed = if enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    };

    installed.map_err(|_| ConfigError::GlobalSubscriberSet)?;
    Ok(pipeline)
}

/// Initialize tracing from `HYPERDX_API_KEY`, `HYPERDX_URL`,
/// `HDX_LOG_LEVEL` and `OTEL_SERVICE_NAME`.
///
/// Equivalent to [`init_tracing`] with [`Config::from_env`].
pub fn init_tracing_from_env() -> Result<Arc<Pipeline>, ConfigError> {
    init_tracing(Config::from_env()?)
}
