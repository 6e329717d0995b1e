//! HTTP delivery of encoded hits.

use crate::tracker::hit::Params;
use reqwest::Url;
use std::time::Duration;

/// Default collection endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://www.google-analytics.com/collect";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery error types. These are logged by the worker, never surfaced.
#[derive(Debug)]
pub enum DeliveryError {
    /// Connection, timeout or body read failure
    Network(String),
    /// Collector answered with a non-2xx status
    Server { status: u16 },
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Network(msg) => write!(f, "Delivery network error: {msg}"),
            DeliveryError::Server { status } => write!(f, "Collector returned status {status}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Sends one request URL to the collector.
///
/// Called only from the delivery worker thread, one request at a time.
pub trait Transport: Send + 'static {
    /// Issue the request and return the HTTP status on success.
    fn send(&mut self, url: &Url) -> Result<u16, DeliveryError>;
}

/// Append URL-encoded hit parameters to the endpoint.
pub fn request_url(endpoint: &Url, params: &Params) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut().clear().extend_pairs(params.iter());
    url
}

/// Blocking HTTP GET transport.
///
/// Wraps an async reqwest client in a current-thread runtime, so it can be
/// driven from the plain worker thread.
pub struct HttpTransport {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DeliveryError::Network(format!("Failed to create runtime: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("usage-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeliveryError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, runtime })
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, url: &Url) -> Result<u16, DeliveryError> {
        let client = &self.client;
        self.runtime.block_on(async {
            let response = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| DeliveryError::Network(e.to_string()))?;

            let status = response.status();
            // Read the whole body so the connection can be reused, then drop it
            let body = response
                .bytes()
                .await
                .map_err(|e| DeliveryError::Network(e.to_string()))?;
            tracing::trace!("Collector response body: {} bytes", body.len());

            if !status.is_success() {
                return Err(DeliveryError::Server {
                    status: status.as_u16(),
                });
            }
            Ok::<u16, DeliveryError>(status.as_u16())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_encoding() {
        let endpoint = Url::parse(DEFAULT_ENDPOINT).unwrap();
        let mut params = Params::new();
        params.insert("t".to_string(), "event".to_string());
        params.insert("ec".to_string(), "button press".to_string());
        params.insert("el".to_string(), "a&b=c".to_string());

        let url = request_url(&endpoint, &params);
        assert_eq!(
            url.as_str(),
            "http://www.google-analytics.com/collect?ec=button+press&el=a%26b%3Dc&t=event"
        );
    }

    #[test]
    fn test_request_url_replaces_endpoint_query() {
        let endpoint = Url::parse("http://localhost:9999/collect?stale=1").unwrap();
        let mut params = Params::new();
        params.insert("v".to_string(), "1".to_string());

        let url = request_url(&endpoint, &params);
        assert_eq!(url.query(), Some("v=1"));
    }

    #[test]
    fn test_delivery_error_display() {
        let err = DeliveryError::Server { status: 503 };
        assert_eq!(err.to_string(), "Collector returned status 503");
    }
}
