//! Per-account session handle.

use super::profile::UserProfile;
use crate::error::SessionError;
use crate::http::{HttpClient, HttpError, HttpRequest};
use crate::refresh::RefreshCoordinator;
use crate::storage::{SessionRecord, TokenBundle};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A logged-in account.
///
/// Cheap to clone. Holds no tokens itself; every call goes through the
/// coordinator and the store.
#[derive(Clone)]
pub struct User {
    account_key: String,
    coordinator: RefreshCoordinator,
    http: Arc<dyn HttpClient>,
    userinfo_endpoint: String,
}

impl User {
    pub(crate) fn new(
        account_key: impl Into<String>,
        coordinator: RefreshCoordinator,
        http: Arc<dyn HttpClient>,
        userinfo_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            account_key: account_key.into(),
            coordinator,
            http,
            userinfo_endpoint: userinfo_endpoint.into(),
        }
    }

    /// Account key of this session.
    #[must_use]
    pub fn account_key(&self) -> &str {
        &self.account_key
    }

    /// Stored session as is, without refreshing.
    ///
    /// # Errors
    ///
    /// Storage read or deserialization errors.
    pub async fn session(&self) -> Result<Option<SessionRecord>, SessionError> {
        self.coordinator.store().get(&self.account_key).await
    }

    /// Tokens guaranteed not to be expired, refreshing if needed.
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::ensure_unexpired_token`].
    pub async fn tokens(&self) -> Result<TokenBundle, SessionError> {
        self.coordinator.ensure_unexpired_token(&self.account_key).await
    }

    /// Access token guaranteed not to be expired.
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::ensure_unexpired_token`].
    pub async fn access_token(&self) -> Result<String, SessionError> {
        self.tokens().await.map(|t| t.access_token)
    }

    /// Refresh now, regardless of expiry.
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::force_refresh`].
    pub async fn refresh(&self) -> Result<TokenBundle, SessionError> {
        self.coordinator.force_refresh(&self.account_key).await
    }

    /// Remove the session. Logging out twice is not an error.
    ///
    /// # Errors
    ///
    /// `StorageWriteFailed` if the stored session could not be removed.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.coordinator.remove(&self.account_key).await
    }

    /// Run `operation` with a valid access token.
    ///
    /// If it fails with HTTP 401 the session is refreshed and the operation
    /// retried once with the new token.
    ///
    /// # Errors
    ///
    /// Token errors from the coordinator, or `RequestFailed` wrapping the
    /// operation's own failure.
    #[instrument(skip(self, operation), fields(account_key = %self.account_key))]
    pub async fn with_authentication<F, Fut, T>(&self, operation: F) -> Result<T, SessionError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, HttpError>>,
    {
        let tokens = self.tokens().await?;
        match operation(tokens.access_token).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_unauthorized() => {
                debug!("Access token rejected, refreshing once");
                let tokens = self.refresh().await?;
                operation(tokens.access_token)
                    .await
                    .map_err(|cause| SessionError::RequestFailed { cause })
            }
            Err(cause) => Err(SessionError::RequestFailed { cause }),
        }
    }

    /// Fetch the userinfo profile.
    ///
    /// # Errors
    ///
    /// See [`Self::with_authentication`].
    pub async fn fetch_profile(&self) -> Result<UserProfile, SessionError> {
        self.with_authentication(|access_token| {
            let http = Arc::clone(&self.http);
            let request = HttpRequest::get(self.userinfo_endpoint.clone())
                .with_header("Accept", "application/json")
                .with_bearer(&access_token);
            async move { http.execute(request).await?.error_for_status()?.json() }
        })
        .await
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("account_key", &self.account_key)
            .finish_non_exhaustive()
    }
}
