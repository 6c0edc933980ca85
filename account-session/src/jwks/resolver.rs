//! Key-set resolution with local caching and single-flight refresh.
//!
//! - Keys are cached for a configured TTL
//! - An unknown key id forces at most one refetch per cooldown window, so
//!   provider key rotation is picked up without a refetch storm
//! - Concurrent refreshes collapse into one remote fetch

use super::key_set::{Jwks, KeySet, VerificationKey};
use crate::error::SessionError;
use crate::http::{HttpClient, HttpRequest};
use account_common::RetryPolicy;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Resolves verification keys by key id.
#[async_trait]
pub trait KeySetResolver: Send + Sync {
    /// Look up a key, fetching the remote key set if needed.
    ///
    /// `Ok(None)` means the key id is unknown to the issuer.
    async fn get_key(&self, kid: &str) -> Result<Option<VerificationKey>, SessionError>;
}

/// A pinned key set never fetches.
#[async_trait]
impl KeySetResolver for KeySet {
    async fn get_key(&self, kid: &str) -> Result<Option<VerificationKey>, SessionError> {
        Ok(self.get(kid).cloned())
    }
}

/// Fetches the issuer's JWKS document.
#[async_trait]
pub trait RemoteKeySetFetch: Send + Sync {
    /// Fetch the current key set.
    async fn fetch(&self) -> Result<Jwks, SessionError>;
}

/// [`RemoteKeySetFetch`] over the abstract [`HttpClient`].
pub struct HttpKeySetFetcher {
    http: Arc<dyn HttpClient>,
    jwks_url: String,
    retry: RetryPolicy,
}

impl HttpKeySetFetcher {
    /// Create a fetcher for the given JWKS endpoint.
    #[must_use]
    pub fn new(http: Arc<dyn HttpClient>, jwks_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            http,
            jwks_url: jwks_url.into(),
            retry,
        }
    }
}

#[async_trait]
impl RemoteKeySetFetch for HttpKeySetFetcher {
    #[instrument(skip(self), fields(url = %self.jwks_url))]
    async fn fetch(&self) -> Result<Jwks, SessionError> {
        let request = HttpRequest::get(self.jwks_url.clone()).with_header("Accept", "application/json");

        let response = self
            .retry
            .execute(|| self.http.execute(request.clone()))
            .await
            .map_err(|e| SessionError::key_set(format!("Failed to fetch JWKS: {e}")))?;

        let response = response
            .error_for_status()
            .map_err(|e| SessionError::key_set(format!("JWKS fetch failed: {e}")))?;

        response
            .json::<Jwks>()
            .map_err(|e| SessionError::key_set(format!("Failed to parse JWKS: {e}")))
    }
}

/// Local cache entry with keys and metadata.
struct CacheEntry {
    keys: KeySet,
    fetched_at: Instant,
}

type InflightFuture = Shared<BoxFuture<'static, Result<Arc<CacheEntry>, SessionError>>>;

/// Caching [`KeySetResolver`] with a single-flight refresh.
pub struct JwkCache {
    fetcher: Arc<dyn RemoteKeySetFetch>,
    local_cache: Arc<ArcSwapOption<CacheEntry>>,
    ttl: Duration,
    refetch_cooldown: Duration,
    inflight: Mutex<Option<InflightFuture>>,
}

impl JwkCache {
    /// Default minimum spacing between refetches triggered by unknown key ids.
    pub const DEFAULT_REFETCH_COOLDOWN: Duration = Duration::from_secs(30);

    /// Create a cache over the given fetcher.
    #[must_use]
    pub fn new(fetcher: Arc<dyn RemoteKeySetFetch>, ttl: Duration) -> Self {
        Self {
            fetcher,
            local_cache: Arc::new(ArcSwapOption::empty()),
            ttl,
            refetch_cooldown: Self::DEFAULT_REFETCH_COOLDOWN,
            inflight: Mutex::new(None),
        }
    }

    /// Override the unknown-key refetch cooldown.
    #[must_use]
    pub const fn with_refetch_cooldown(mut self, cooldown: Duration) -> Self {
        self.refetch_cooldown = cooldown;
        self
    }

    /// Checks if the local cache is stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.local_cache
            .load()
            .as_ref()
            .is_none_or(|entry| entry.fetched_at.elapsed() >= self.ttl)
    }

    /// Number of locally cached keys.
    #[must_use]
    pub fn local_key_count(&self) -> usize {
        self.local_cache
            .load()
            .as_ref()
            .map_or(0, |entry| entry.keys.len())
    }

    /// Drop the local cache and fetch again.
    ///
    /// # Errors
    ///
    /// Returns `KeySetUnavailable` if the fetch fails.
    pub async fn force_refresh(&self) -> Result<(), SessionError> {
        self.local_cache.store(None);
        self.refresh_single_flight().await.map(|_| ())
    }

    fn lookup(&self, kid: &str) -> Lookup {
        match self.local_cache.load().as_ref() {
            None => Lookup::Empty,
            Some(entry) if entry.fetched_at.elapsed() >= self.ttl => Lookup::Stale,
            Some(entry) => match entry.keys.get(kid) {
                Some(key) => Lookup::Hit(key.clone()),
                None if entry.fetched_at.elapsed() >= self.refetch_cooldown => Lookup::Stale,
                None => Lookup::Miss,
            },
        }
    }

    /// Only one fetch runs even if many callers refresh at once.
    async fn refresh_single_flight(&self) -> Result<Arc<CacheEntry>, SessionError> {
        let mut inflight_guard = self.inflight.lock().await;

        if let Some(fut) = inflight_guard.as_ref() {
            let fut = fut.clone();
            drop(inflight_guard);
            return fut.await;
        }

        let fetcher = Arc::clone(&self.fetcher);
        let local_cache = Arc::clone(&self.local_cache);

        let fut: BoxFuture<'static, Result<Arc<CacheEntry>, SessionError>> = Box::pin(async move {
            info!("Fetching JWKS");
            let jwks = fetcher.fetch().await?;

            let entry = Arc::new(CacheEntry {
                keys: KeySet::from_jwks(&jwks),
                fetched_at: Instant::now(),
            });
            if entry.keys.len() < jwks.keys.len() {
                warn!(
                    published = jwks.keys.len(),
                    usable = entry.keys.len(),
                    "Some published keys were skipped"
                );
            }

            local_cache.store(Some(Arc::clone(&entry)));
            info!(keys = entry.keys.len(), "JWKS cache updated");
            Ok(entry)
        });

        let shared = fut.shared();
        *inflight_guard = Some(shared.clone());
        drop(inflight_guard);

        let result = shared.clone().await;

        let mut inflight_guard = self.inflight.lock().await;
        if inflight_guard.as_ref().is_some_and(|f| f.ptr_eq(&shared)) {
            inflight_guard.take();
        }

        result
    }
}

enum Lookup {
    Hit(VerificationKey),
    Miss,
    Stale,
    Empty,
}

#[async_trait]
impl KeySetResolver for JwkCache {
    #[instrument(skip(self), fields(kid = %kid))]
    async fn get_key(&self, kid: &str) -> Result<Option<VerificationKey>, SessionError> {
        match self.lookup(kid) {
            Lookup::Hit(key) => return Ok(Some(key)),
            Lookup::Miss => {
                debug!("Key id unknown and refetch cooling down");
                return Ok(None);
            }
            Lookup::Stale | Lookup::Empty => {}
        }

        let entry = self.refresh_single_flight().await?;
        Ok(entry.keys.get(kid).cloned())
    }
}
