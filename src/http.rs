use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use std::time::Duration;

use crate::error::{ConfigError, DeliveryError};
use crate::transport::Transport;

/// Collector endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://in.hyperdx.io";

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Transport`] that POSTs NDJSON payloads to an HTTP(S) collector,
/// authenticating with a bearer token.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    token: String,
}

impl HttpTransport {
    /// Build a transport for `endpoint`.
    ///
    /// **Returns**
    /// - `Err(ConfigError::EmptyToken)` if `token` is blank.
    /// - `Err(ConfigError::InvalidEndpoint { .. })` if `endpoint` is not
    ///   an absolute http or https URL.
    pub fn new(token: &str, endpoint: &str, timeout: Duration) -> Result<Self, ConfigError> {
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        let endpoint = parse_endpoint(endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            token: token.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Accept only absolute http(s) URLs.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        url: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {:?}", other))),
    }
}

fn classify(err: reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::Permanent(format!("failed to build request: {}", err))
    } else {
        DeliveryError::Transient(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(DeliveryError::from_status(status.as_u16(), &text))
        }
    }
}
