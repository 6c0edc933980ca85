//! Session facade used by host applications.

pub mod profile;
pub mod user;

pub use profile::UserProfile;
pub use user::User;

use crate::config::ClientConfiguration;
use crate::error::SessionError;
use crate::events::{ListenerHandle, Listeners, SessionEvent};
use crate::http::{HttpClient, ReqwestHttpClient, TokenEndpoint, TokenResponse};
use crate::jwks::{HttpKeySetFetcher, JwkCache, KeySetResolver};
use crate::jwt::IdTokenValidator;
use crate::refresh::RefreshCoordinator;
use crate::storage::{EncryptedFileStore, SecureKeyedStore, SessionRecord, SessionStore, TokenBundle};
use account_common::RetryPolicy;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

/// One configured OAuth2/OIDC client and the sessions it owns.
pub struct Client {
    config: Arc<ClientConfiguration>,
    http: Arc<dyn HttpClient>,
    validator: IdTokenValidator,
    coordinator: RefreshCoordinator,
    listeners: Listeners,
}

impl Client {
    /// Client with the default collaborators: reqwest transport, encrypted
    /// file store and a cached remote key set.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: ClientConfiguration) -> Result<Self, SessionError> {
        config.validate()?;

        let http: Arc<dyn HttpClient> = Arc::new(
            ReqwestHttpClient::new(&config.http)
                .map_err(|e| SessionError::Configuration(e.to_string()))?,
        );
        let store = Arc::new(EncryptedFileStore::new(
            &config.storage_dir,
            &config.service,
            *config.encryption_key,
        )?);
        let fetcher = Arc::new(HttpKeySetFetcher::new(
            Arc::clone(&http),
            &config.jwks_endpoint,
            RetryPolicy::new(config.retry.clone()),
        ));
        let resolver = Arc::new(JwkCache::new(fetcher, config.jwks_ttl));

        Ok(Self::with_parts(config, http, store, resolver))
    }

    /// Client over caller-supplied collaborators.
    #[must_use]
    pub fn with_parts(
        config: ClientConfiguration,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn SecureKeyedStore>,
        resolver: Arc<dyn KeySetResolver>,
    ) -> Self {
        let validator = IdTokenValidator::new(resolver, &config.issuer, &config.client_id);

        let mut endpoint = TokenEndpoint::new(
            Arc::clone(&http),
            &config.token_endpoint,
            &config.client_id,
            RetryPolicy::new(config.retry.clone()),
        );
        if let Some(secret) = &config.client_secret {
            endpoint = endpoint.with_client_secret(secret.as_str());
        }

        let listeners = Listeners::new();
        let coordinator = RefreshCoordinator::new(
            SessionStore::new(store),
            endpoint,
            validator.clone(),
            listeners.clone(),
            config.expiry_margin,
            config.default_token_lifetime,
        );

        Self {
            config: Arc::new(config),
            http,
            validator,
            coordinator,
            listeners,
        }
    }

    /// Client configuration.
    #[must_use]
    pub fn configuration(&self) -> &ClientConfiguration {
        &self.config
    }

    /// Account key used for sessions created by this client.
    #[must_use]
    pub fn account_key(&self) -> String {
        self.config.account_key()
    }

    /// Handle for an account key. Does not check a session exists.
    #[must_use]
    pub fn user(&self, account_key: impl Into<String>) -> User {
        User::new(
            account_key,
            self.coordinator.clone(),
            Arc::clone(&self.http),
            self.config.userinfo_endpoint.clone(),
        )
    }

    /// Validate the identity token of a completed authorization and persist
    /// the new session.
    ///
    /// # Errors
    ///
    /// A validation error, `TokenMalformed` if the response has no identity
    /// token, or `StorageWriteFailed`.
    #[instrument(skip(self, response, expected_nonce))]
    pub async fn complete_login(
        &self,
        response: TokenResponse,
        expected_nonce: Option<&str>,
    ) -> Result<User, SessionError> {
        let id_token = response
            .id_token
            .as_deref()
            .ok_or_else(|| SessionError::malformed("Token response has no id_token"))?;

        let claims = self.validator.validate(id_token, expected_nonce).await?;
        let tokens = TokenBundle::from_login(response, claims, Utc::now().timestamp())?;

        let account_key = self.account_key();
        self.coordinator
            .install(&SessionRecord::new(account_key.clone(), tokens))
            .await?;

        info!(account_key = %account_key, "Login completed");
        Ok(self.user(account_key))
    }

    /// Access token for `account_key` that is not expired.
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::ensure_unexpired_token`].
    pub async fn with_unexpired_token(&self, account_key: &str) -> Result<String, SessionError> {
        self.coordinator
            .ensure_unexpired_token(account_key)
            .await
            .map(|t| t.access_token)
    }

    /// Remove the session for `account_key`. Idempotent.
    ///
    /// # Errors
    ///
    /// `StorageWriteFailed` if the stored session could not be removed.
    pub async fn logout(&self, account_key: &str) -> Result<(), SessionError> {
        self.coordinator.remove(account_key).await
    }

    /// Stored sessions, most recently updated first.
    ///
    /// # Errors
    ///
    /// `StorageReadFailed` if the store cannot be listed.
    pub async fn all_sessions(&self) -> Result<Vec<SessionRecord>, SessionError> {
        self.coordinator.store().get_all().await
    }

    /// Copy a session into the shared namespace of `access_group`.
    ///
    /// # Errors
    ///
    /// `Configuration` for an invalid group name, `SessionNotFound` or a
    /// storage error.
    pub async fn hand_off_session_to_shared_store(
        &self,
        account_key: &str,
        access_group: &str,
    ) -> Result<(), SessionError> {
        self.coordinator.hand_off(account_key, access_group).await
    }

    /// Hand off to the configured shared access group.
    ///
    /// # Errors
    ///
    /// `Configuration` if no group is configured, otherwise as
    /// [`Self::hand_off_session_to_shared_store`].
    pub async fn hand_off_session(&self, account_key: &str) -> Result<(), SessionError> {
        let group = self.configured_access_group()?;
        self.hand_off_session_to_shared_store(account_key, group)
            .await
    }

    /// Adopt a session from the configured shared access group.
    ///
    /// # Errors
    ///
    /// `Configuration` if no group is configured, otherwise as
    /// [`Self::session_from_shared_store`].
    pub async fn adopt_shared_session(&self) -> Result<Option<User>, SessionError> {
        let group = self.configured_access_group()?;
        self.session_from_shared_store(group).await
    }

    fn configured_access_group(&self) -> Result<&str, SessionError> {
        self.config
            .shared_access_group
            .as_deref()
            .ok_or_else(|| SessionError::Configuration("no shared access group configured".to_string()))
    }

    /// Adopt a session handed off into `access_group` for this client's
    /// account key, copying it into the client's own store.
    ///
    /// # Errors
    ///
    /// `Configuration` for an invalid group name, storage or
    /// deserialization errors.
    #[instrument(skip(self))]
    pub async fn session_from_shared_store(
        &self,
        access_group: &str,
    ) -> Result<Option<User>, SessionError> {
        let shared = self.coordinator.store().shared(access_group)?;
        let account_key = self.account_key();

        let Some(record) = shared.get(&account_key).await? else {
            return Ok(None);
        };

        self.coordinator.install(&record).await?;
        info!(account_key = %account_key, "Adopted shared session");
        Ok(Some(self.user(account_key)))
    }

    /// Most recently updated stored session, if any.
    ///
    /// # Errors
    ///
    /// `StorageReadFailed` if the store cannot be listed.
    pub async fn resume_last_session(&self) -> Result<Option<User>, SessionError> {
        Ok(self
            .all_sessions()
            .await?
            .into_iter()
            .next()
            .map(|record| self.user(record.account_key)))
    }

    /// Register a session event listener.
    ///
    /// Listeners run synchronously while the account's state is locked, so
    /// they must not block.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners.remove(handle)
    }
}
