use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;
use warden_core::{Result, WardenError};

/// A fully resolved request to send upstream.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Whatever the upstream answered. Any status counts as a response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Transport seam between the pipeline and the network.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send one request. Only transport failures are errors; they come back
    /// as `UpstreamTimeout` or `UpstreamUnreachable`.
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse>;
}

/// reqwest-backed upstream with a fixed per-request timeout.
pub struct HttpUpstream {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::none())
            .tcp_nodelay(true)
            .build()?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, url: &str, error: &reqwest::Error) -> WardenError {
        if error.is_timeout() {
            WardenError::UpstreamTimeout(format!(
                "{url} did not answer within {}ms",
                self.timeout.as_millis()
            ))
        } else if error.is_connect() {
            WardenError::UpstreamUnreachable(format!("{url}: connection failed: {error}"))
        } else {
            WardenError::UpstreamUnreachable(format!("{url}: {error}"))
        }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse> {
        let url = request.url;
        let response = self
            .client
            .request(request.method, &url)
            .headers(request.headers)
            .body(request.body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(&url, &e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.classify(&url, &e))?;
        tracing::debug!(url = %url, status = status.as_u16(), bytes = body.len(), "upstream: response received");

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
