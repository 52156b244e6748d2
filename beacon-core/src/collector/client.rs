//! HTTP transport to the activity collector
//!
//! One call, one request: no retries live here. The dispatcher decides what
//! a failure means.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// A single synchronous exchange with the collector.
///
/// `endpoint` is relative to the collector's API root (see
/// [`endpoints`](super::endpoints)).
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body. Any non-2xx status is a failure.
    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<()>;

    /// GET a JSON document.
    async fn get(&self, endpoint: &str) -> Result<serde_json::Value>;
}

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for the collector in `config`
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let base_url = format!("{}/api/0", config.server_url.trim_end_matches('/'));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Base URL requests are joined onto
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<()> {
        let url = self.url(endpoint);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(error_from_response(status, response).await)
        }
    }

    async fn get(&self, endpoint: &str) -> Result<serde_json::Value> {
        let url = self.url(endpoint);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("failed to parse response: {}", e)))
        } else {
            Err(error_from_response(status, response).await)
        }
    }
}

async fn error_from_response(status: reqwest::StatusCode, response: reqwest::Response) -> Error {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    Error::Http {
        status: status.as_u16(),
        body,
    }
}
