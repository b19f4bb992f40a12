use super::GatewayError;
use async_trait::async_trait;
use std::time::Duration;

/// Posts an XML body and returns the response body.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn post_xml(&self, url: &str, body: String) -> Result<String, GatewayError>;
}

/// reqwest-backed transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl GatewayTransport for HttpTransport {
    async fn post_xml(&self, url: &str, body: String) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::HttpStatus {
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}
