use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use tracing_hdx_sink::init::init_tracing;
use tracing_hdx_sink::noop_transport::NoopTransport;
use tracing_hdx_sink::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(NoopTransport::default());
    let pipeline = init_tracing(Config::with_transport_only(transport.clone()))?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    pipeline.shutdown().await;
    let stats = pipeline.stats();
    println!("delivered {} records in {} payloads ({} bytes), dropped {}",
        stats.delivered_records,
        transport.payloads(),
        transport.bytes(),
        stats.dropped_records
    );
    Ok(())
}
