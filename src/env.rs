//! Environment variable names used by this crate for convenient
//! configuration from services.
//!
//! These are read once, by [`Config::from_env`](crate::config::Config::from_env)
//! and [`StaticAttributes::detect`](crate::encoder::StaticAttributes::detect);
//! the pipeline itself never touches the environment.

/// API key for the collector.
pub const HYPERDX_API_KEY_ENV: &str = "HYPERDX_API_KEY";

/// Collector URL override, e.g. `http://127.0.0.1:8002`.
pub const HYPERDX_URL_ENV: &str = "HYPERDX_URL";

/// Minimum level to ship (`debug`, `info`, `warn`, `error`, `fatal`).
pub const HDX_LOG_LEVEL_ENV: &str = "HDX_LOG_LEVEL";

/// Logical service name, baked into every record.
pub const OTEL_SERVICE_NAME_ENV: &str = "OTEL_SERVICE_NAME";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Non-empty value of `key`, if set.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Service name from `OTEL_SERVICE_NAME`, empty when unset.
pub fn service_name() -> String {
    env_or(OTEL_SERVICE_NAME_ENV, "")
}

/// Host name: `HOSTNAME` if set, else the system host name, else empty.
pub fn hostname() -> String {
    if let Some(host) = env_opt("HOSTNAME") {
        return host;
    }
    system_hostname().unwrap_or_default()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    env_opt("COMPUTERNAME")
}
