use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use tracing_hdx_sink::{init::init_tracing, Config, DeliveryError, Transport};

/// Example of shipping batches somewhere other than an HTTP collector by
/// implementing the `Transport` trait directly. Imagine this writes to a
/// message queue the crate has no built-in support for.
struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError> {
        // Here you would call your own client library.
        // For the sake of example we just print the batch.
        print!("[my-queue] {}", String::from_utf8_lossy(payload));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport: Arc<dyn Transport> = Arc::new(StdoutTransport);
    let pipeline = init_tracing(Config::with_transport_only(transport).with_type("custom"))?;

    info!("custom transport example started");
    error!(queue = "my-queue", "simulated error sent via custom transport");

    pipeline.shutdown().await;
    Ok(())
}
