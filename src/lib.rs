pub mod level;
pub mod record;
pub mod encoder;
pub mod trace;
pub mod buffer;
pub mod retry;
pub mod transport;
pub mod sink;
pub mod stats;
pub mod mirror;

#[cfg(feature = "http")]
pub mod http;

pub mod env;
pub mod error;
pub mod config;
pub mod pipeline;
pub mod logger;
pub mod layer;
pub mod init;
pub mod noop_transport;

pub use config::Config;
pub use error::{ConfigError, DeliveryError};
pub use level::Level;
pub use logger::Logger;
pub use pipeline::Pipeline;
pub use transport::Transport;
