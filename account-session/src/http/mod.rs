//! Abstract HTTP capability consumed by the session engine.
//!
//! The engine never talks to the network directly. Token refresh, key-set
//! fetches and profile calls go through [`HttpClient`], which host
//! applications may implement over any transport. [`ReqwestHttpClient`] is
//! the default adapter.

pub mod reqwest_client;
pub mod token_endpoint;

use account_common::Retryable;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use reqwest_client::ReqwestHttpClient;
pub use token_endpoint::{TokenEndpoint, TokenResponse};

/// HTTP method used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
}

/// Outbound request description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method
    pub method: HttpMethod,
    /// Absolute URL
    pub url: String,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// `application/x-www-form-urlencoded` body fields
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    /// Create a GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
        }
    }

    /// Create a form POST request.
    #[must_use]
    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            form,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a bearer authorization header.
    #[must_use]
    pub fn with_bearer(self, access_token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {access_token}"))
    }

    /// Value of a form field, if present.
    #[must_use]
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Response returned by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Raw body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Build a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Turn a non-2xx response into [`HttpError::Status`].
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Status` when the status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HttpError::Status {
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            })
        }
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Decode` if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}

/// HTTP failure classified for retry decisions.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The request timed out
    #[error("request timed out")]
    Timeout,

    /// Non-2xx response
    #[error("unexpected status {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body, lossily decoded
        body: String,
    },

    /// Response body could not be decoded
    #[error("response decode error: {0}")]
    Decode(String),
}

impl HttpError {
    /// Whether the server rejected the credentials (HTTP 401).
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}

impl Retryable for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Abstract HTTP capability.
///
/// Implementations own timeouts and cancellation; retries are layered on top
/// by the caller with a [`RetryPolicy`](account_common::RetryPolicy).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute a request. Non-2xx responses are returned as `Ok`.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryability() {
        let server_error = HttpError::Status {
            status: 503,
            body: String::new(),
        };
        let bad_request = HttpError::Status {
            status: 400,
            body: "invalid_grant".to_string(),
        };
        assert!(server_error.is_retryable());
        assert!(HttpError::Timeout.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(!HttpError::Decode("eof".to_string()).is_retryable());
    }

    #[test]
    fn test_error_for_status() {
        let ok = HttpResponse::new(200, b"{}".to_vec());
        assert!(ok.error_for_status().is_ok());

        let unauthorized = HttpResponse::new(401, b"expired".to_vec());
        let err = unauthorized.error_for_status().unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_request_builders() {
        let request = HttpRequest::post_form(
            "https://login.example.com/oauth/token",
            vec![("grant_type".to_string(), "refresh_token".to_string())],
        )
        .with_bearer("abc");

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.form_value("grant_type"), Some("refresh_token"));
        assert_eq!(request.form_value("missing"), None);
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }
}
