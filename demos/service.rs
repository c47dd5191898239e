use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::Context;
use tracing::{error, info, warn};

use tracing_hdx_sink::init::init_tracing;
use tracing_hdx_sink::{Config, Logger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // HYPERDX_API_KEY, HYPERDX_URL, HDX_LOG_LEVEL and OTEL_SERVICE_NAME
    let config = Config::from_env()?.with_stdout(true);
    let pipeline = init_tracing(config)?;

    info!("starting service");

    let span = SpanContext::new(
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736")?,
        SpanId::from_hex("00f067aa0ba902b7")?,
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    let cx = Context::new().with_remote_span_context(span);
    {
        let _guard = cx.clone().attach();
        error!(
            user_id = 42,
            reason = "invalid password",
            "authentication failed"
        );
    }

    // same pipeline, used directly
    let audit = Logger::from_pipeline(pipeline.clone())
        .named("audit")
        .with_fields([("tenant", "acme")])
        .with_trace_metadata(&cx);
    audit.warn("password reset requested");

    if !pipeline.shutdown().await {
        warn!("some log batches were abandoned at shutdown");
    }
    println!("{:?}", pipeline.stats());
    Ok(())
}
