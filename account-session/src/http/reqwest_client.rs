//! Default [`HttpClient`] adapter over reqwest.

use super::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse};
use account_common::{HttpConfig, build_http_client};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// [`HttpClient`] backed by a pooled reqwest client with rustls.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Build the adapter from an [`HttpConfig`].
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Transport` if the client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        let client = build_http_client(config)
            .map_err(|e| HttpError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    #[must_use]
    pub const fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn classify(err: &reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout
    } else if err.is_decode() {
        HttpError::Decode(err.to_string())
    } else {
        HttpError::Transport(err.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| classify(&e))?;

        debug!(status, bytes = body.len(), "HTTP response received");
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}
