use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tracing::error;

use tracing_hdx_sink::buffer::BufferConfig;
use tracing_hdx_sink::init::init_tracing;
use tracing_hdx_sink::noop_transport::NoopTransport;
use tracing_hdx_sink::{Config, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(NoopTransport::default());

    let mut config = Config::with_transport_only(transport.clone())
        .with_buffer(BufferConfig {
            flush_bytes: 256 * 1024,
            flush_interval: Duration::from_millis(200),
            max_records: 50_000,
            max_bytes: 16 * 1024 * 1024,
        })
        .with_stacktrace_level(None)
        .with_level(Level::Error);
    config.max_in_flight = 8;

    let pipeline = init_tracing(config)?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    pipeline.shutdown().await;
    println!("{:?} ({} payloads)", pipeline.stats(), transport.payloads());
    Ok(())
}
