//! Single-flight token refresh per account key.
//!
//! Each account key owns one state cell in an arena. The cell's mutex guards
//! the pending refresh and a generation counter; it is never held across the
//! network exchange itself, only across the short reads and writes that
//! start and finish a refresh. Unrelated accounts never contend.
//!
//! The exchange runs on a spawned task, so a caller that stops waiting does
//! not cancel a refresh other callers are attached to.

use crate::error::SessionError;
use crate::events::{Listeners, SessionEvent};
use crate::http::TokenEndpoint;
use crate::jwt::IdTokenValidator;
use crate::storage::{SessionRecord, SessionStore, TokenBundle};
use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<SessionRecord>, SessionError>>>;

#[derive(Default)]
struct AccountState {
    /// Bumped whenever the stored session is replaced or removed outside a refresh
    generation: u64,
    inflight: Option<SharedRefresh>,
}

type AccountCell = Arc<Mutex<AccountState>>;

struct Inner {
    store: SessionStore,
    endpoint: TokenEndpoint,
    validator: IdTokenValidator,
    listeners: Listeners,
    expiry_margin: Duration,
    default_lifetime: Duration,
    accounts: parking_lot::Mutex<HashMap<String, AccountCell>>,
}

/// Coordinates refreshes, logins, logouts and hand-offs per account key.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Create a coordinator.
    ///
    /// `default_lifetime` dates refreshed access tokens whose response gives
    /// neither `expires_in` nor a new identity token.
    #[must_use]
    pub fn new(
        store: SessionStore,
        endpoint: TokenEndpoint,
        validator: IdTokenValidator,
        listeners: Listeners,
        expiry_margin: Duration,
        default_lifetime: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                endpoint,
                validator,
                listeners,
                expiry_margin,
                default_lifetime,
                accounts: parking_lot::Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Session store the coordinator writes through.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    /// Safety margin applied to access token expiry.
    #[must_use]
    pub fn expiry_margin(&self) -> Duration {
        self.inner.expiry_margin
    }

    fn cell(&self, account_key: &str) -> AccountCell {
        Arc::clone(
            self.inner
                .accounts
                .lock()
                .entry(account_key.to_string())
                .or_default(),
        )
    }

    /// Tokens for `account_key` that are not expired, refreshing if needed.
    ///
    /// Concurrent callers for the same account share one refresh.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if nothing is stored for the account
    /// - `NoRefreshToken` if the tokens expired and cannot be refreshed;
    ///   no network call is made
    /// - `RefreshRequestFailed` if the token endpoint call failed; the stored
    ///   session is left as it was
    /// - a validation error if the refreshed identity token is rejected
    #[instrument(skip(self))]
    pub async fn ensure_unexpired_token(
        &self,
        account_key: &str,
    ) -> Result<TokenBundle, SessionError> {
        self.acquire(account_key, false).await
    }

    /// Refresh regardless of expiry, still sharing any in-flight refresh.
    ///
    /// # Errors
    ///
    /// Same as [`Self::ensure_unexpired_token`].
    #[instrument(skip(self))]
    pub async fn force_refresh(&self, account_key: &str) -> Result<TokenBundle, SessionError> {
        self.acquire(account_key, true).await
    }

    async fn acquire(&self, account_key: &str, force: bool) -> Result<TokenBundle, SessionError> {
        let cell = self.cell(account_key);
        let mut state = cell.lock().await;

        if let Some(inflight) = state.inflight.clone() {
            drop(state);
            debug!("Joining in-flight refresh");
            return inflight.await.map(|record| record.tokens.clone());
        }

        let record = self
            .inner
            .store
            .get(account_key)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound {
                account_key: account_key.to_string(),
            })?;

        let margin = i64::try_from(self.inner.expiry_margin.as_secs()).unwrap_or(i64::MAX);
        if !force && !record.tokens.is_expired_at(Utc::now().timestamp(), margin) {
            return Ok(record.tokens);
        }

        if !record.tokens.has_refresh_token() {
            warn!("Token expired and no refresh token is stored");
            self.inner.listeners.emit(&SessionEvent::RefreshFailed {
                account_key: account_key.to_string(),
                error: SessionError::NoRefreshToken,
            });
            return Err(SessionError::NoRefreshToken);
        }

        let refresh = self.spawn_refresh(Arc::clone(&cell), record, state.generation);
        state.inflight = Some(refresh.clone());
        drop(state);

        refresh.await.map(|record| record.tokens.clone())
    }

    fn spawn_refresh(
        &self,
        cell: AccountCell,
        record: SessionRecord,
        generation: u64,
    ) -> SharedRefresh {
        let inner = Arc::clone(&self.inner);
        let task_cell = Arc::clone(&cell);

        let task = tokio::spawn(async move {
            let account_key = record.account_key.clone();
            let outcome = inner.exchange(&record).await;

            let mut state = task_cell.lock().await;
            if state.generation != generation {
                debug!(account_key = %account_key, "Session replaced during refresh, discarding result");
                return match inner.store.get(&account_key).await {
                    Ok(Some(current)) => Ok(Arc::new(current)),
                    Ok(None) => Err(SessionError::SessionNotFound { account_key }),
                    Err(e) => Err(e),
                };
            }

            let result = match outcome {
                Ok(updated) => {
                    let stored = inner.store.store(&updated).await;
                    stored.map(|()| Arc::new(updated))
                }
                Err(e) => Err(e),
            };

            match &result {
                Ok(_) => {
                    info!(account_key = %account_key, "Session refreshed");
                    inner.listeners.emit(&SessionEvent::Refreshed {
                        account_key: account_key.clone(),
                    });
                }
                Err(e) => {
                    warn!(account_key = %account_key, code = e.code(), error = %e, "Refresh failed");
                    inner.listeners.emit(&SessionEvent::RefreshFailed {
                        account_key: account_key.clone(),
                        error: e.clone(),
                    });
                }
            }

            state.inflight = None;
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let mut state = cell.lock().await;
                    if state.generation == generation {
                        state.inflight = None;
                    }
                    Err(SessionError::Internal(format!("Refresh task failed: {e}")))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Persist a new session, replacing any previous one for its account key.
    ///
    /// A refresh still in flight for the replaced session is discarded.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the session was not persisted.
    #[instrument(skip(self, record), fields(account_key = %record.account_key))]
    pub async fn install(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let cell = self.cell(&record.account_key);
        let mut state = cell.lock().await;

        self.inner.store.store(record).await?;
        state.generation = state.generation.wrapping_add(1);
        state.inflight = None;

        info!("Session stored");
        self.inner.listeners.emit(&SessionEvent::LoggedIn {
            account_key: record.account_key.clone(),
        });
        Ok(())
    }

    /// Remove the session for `account_key`. Removing an absent session succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if an existing session could not be removed.
    #[instrument(skip(self))]
    pub async fn remove(&self, account_key: &str) -> Result<(), SessionError> {
        let cell = self.cell(account_key);
        let mut state = cell.lock().await;

        let existed = matches!(self.inner.store.get_raw(account_key).await, Ok(Some(_)));
        self.inner.store.remove(account_key).await?;
        state.generation = state.generation.wrapping_add(1);
        state.inflight = None;

        if existed {
            info!("Session removed");
            self.inner.listeners.emit(&SessionEvent::LoggedOut {
                account_key: account_key.to_string(),
            });
        }
        Ok(())
    }

    /// Copy the stored session into `access_group`'s shared namespace.
    ///
    /// The original stays in place; a previous hand-off is overwritten.
    ///
    /// # Errors
    ///
    /// `Configuration` for an invalid group name, `SessionNotFound` if nothing
    /// is stored for the account, or a storage error.
    #[instrument(skip(self))]
    pub async fn hand_off(&self, account_key: &str, access_group: &str) -> Result<(), SessionError> {
        let shared = self.inner.store.shared(access_group)?;
        let cell = self.cell(account_key);
        let _state = cell.lock().await;

        let bytes = self
            .inner
            .store
            .get_raw(account_key)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound {
                account_key: account_key.to_string(),
            })?;

        shared.put_raw(account_key, &bytes).await?;

        info!("Session handed off to shared store");
        self.inner.listeners.emit(&SessionEvent::HandedOff {
            account_key: account_key.to_string(),
            access_group: access_group.to_string(),
        });
        Ok(())
    }
}

impl Inner {
    async fn exchange(&self, record: &SessionRecord) -> Result<SessionRecord, SessionError> {
        let refresh_token = record
            .tokens
            .refresh_token
            .as_deref()
            .ok_or(SessionError::NoRefreshToken)?;

        let response = self.endpoint.refresh(refresh_token).await?;

        let claims = match response.id_token.as_deref() {
            Some(id_token) => {
                let claims = self.validator.validate(id_token, None).await?;
                if claims.sub != record.tokens.id_token_claims.sub {
                    return Err(SessionError::malformed(
                        "Refreshed identity token names a different subject",
                    ));
                }
                Some(claims)
            }
            None => None,
        };

        let default_lifetime = i64::try_from(self.default_lifetime.as_secs()).unwrap_or(i64::MAX);
        let tokens =
            record
                .tokens
                .refreshed(response, claims, Utc::now().timestamp(), default_lifetime);
        Ok(record.with_tokens(tokens))
    }
}
