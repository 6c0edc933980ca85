//! Token endpoint client for the refresh-token grant.

use super::{HttpClient, HttpError, HttpRequest};
use account_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

/// Standard OAuth2 token response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Refresh token, omitted when the server does not rotate it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Compact-serialized ID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Granted scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Token type, normally `Bearer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Client for the identity provider's token endpoint.
pub struct TokenEndpoint {
    http: Arc<dyn HttpClient>,
    token_url: String,
    client_id: String,
    client_secret: Option<Zeroizing<String>>,
    retry: RetryPolicy,
}

impl TokenEndpoint {
    /// Create a token endpoint client.
    #[must_use]
    pub fn new(
        http: Arc<dyn HttpClient>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            retry,
        }
    }

    /// Authenticate with `client_secret_post`.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(Zeroizing::new(secret.into()));
        self
    }

    /// Exchange a refresh token for a new token response.
    ///
    /// Transient failures are retried according to the configured policy.
    ///
    /// # Errors
    ///
    /// Returns the last `HttpError` if the request keeps failing, the server
    /// answers with a non-2xx status, or the body is not a token response.
    #[instrument(skip(self, refresh_token), fields(token_url = %self.token_url))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, HttpError> {
        let request = self.refresh_request(refresh_token);

        let result = self
            .retry
            .execute(|| {
                let request = request.clone();
                async move {
                    let response = self.http.execute(request).await?.error_for_status()?;
                    response.json::<TokenResponse>()
                }
            })
            .await;

        match &result {
            Ok(_) => info!("Refresh token exchanged"),
            Err(e) => warn!(error = %e, "Refresh token exchange failed"),
        }
        result
    }

    fn refresh_request(&self, refresh_token: &str) -> HttpRequest {
        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret".to_string(), secret.to_string()));
        }
        HttpRequest::post_form(self.token_url.clone(), form)
            .with_header("Accept", "application/json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        requests: Mutex<Vec<HttpRequest>>,
        response: HttpResponse,
    }

    #[async_trait]
    impl HttpClient for Recorder {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.requests.lock().push(request);
            Ok(self.response.clone())
        }
    }

    fn recorder(status: u16, body: &str) -> Arc<Recorder> {
        Arc::new(Recorder {
            requests: Mutex::new(Vec::new()),
            response: HttpResponse::new(status, body.as_bytes().to_vec()),
        })
    }

    #[tokio::test]
    async fn test_refresh_builds_grant_form() {
        let http = recorder(
            200,
            r#"{"access_token":"at-2","refresh_token":"rt-2","expires_in":3600}"#,
        );
        let endpoint = TokenEndpoint::new(
            http.clone(),
            "https://login.example.com/oauth/token",
            "client-1",
            RetryPolicy::no_retries(),
        )
        .with_client_secret("s3cret");

        let response = endpoint.refresh("rt-1").await.unwrap();
        assert_eq!(response.access_token, "at-2");
        assert_eq!(response.refresh_token.as_deref(), Some("rt-2"));
        assert_eq!(response.id_token, None);

        let requests = http.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].form_value("grant_type"), Some("refresh_token"));
        assert_eq!(requests[0].form_value("refresh_token"), Some("rt-1"));
        assert_eq!(requests[0].form_value("client_id"), Some("client-1"));
        assert_eq!(requests[0].form_value("client_secret"), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_refresh_surfaces_status_errors() {
        let http = recorder(400, r#"{"error":"invalid_grant"}"#);
        let endpoint = TokenEndpoint::new(
            http,
            "https://login.example.com/oauth/token",
            "client-1",
            RetryPolicy::no_retries(),
        );

        let err = endpoint.refresh("rt-1").await.unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_refresh_rejects_non_token_body() {
        let http = recorder(200, "<html>maintenance</html>");
        let endpoint = TokenEndpoint::new(
            http,
            "https://login.example.com/oauth/token",
            "client-1",
            RetryPolicy::no_retries(),
        );

        assert!(matches!(
            endpoint.refresh("rt-1").await,
            Err(HttpError::Decode(_))
        ));
    }
}
