//! Mock implementations for testing.
//!
//! This module provides in-memory stand-ins for the engine's collaborators.

use account_session::http::{HttpClient, HttpError, HttpRequest, HttpResponse};
use account_session::storage::check_namespace;
use account_session::{SecureKeyedStore, SessionError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

type Namespaces = HashMap<String, HashMap<String, Vec<u8>>>;

/// In-memory [`SecureKeyedStore`].
///
/// Clones and shared views see the same data.
#[derive(Clone)]
pub struct MemoryKeyedStore {
    namespace: String,
    data: Arc<Mutex<Namespaces>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl Default for MemoryKeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyedStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            namespace: "private".to_string(),
            data: Arc::new(Mutex::new(HashMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Another application's private view over the same backing data.
    ///
    /// Shared access groups are visible from every namespace.
    #[must_use]
    pub fn with_namespace(&self, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..self.clone()
        }
    }

    /// Make every subsequent write fail with `StorageWriteFailed`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes in this namespace and its shared views.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Store bytes without any checks, e.g. a corrupt blob.
    pub fn insert_raw(&self, account: &str, bytes: &[u8]) {
        self.data
            .lock()
            .entry(self.namespace.clone())
            .or_default()
            .insert(account.to_string(), bytes.to_vec());
    }

    /// Number of entries in this namespace.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().get(&self.namespace).map_or(0, HashMap::len)
    }

    /// Whether this namespace is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SecureKeyedStore for MemoryKeyedStore {
    async fn set_value(&self, value: &[u8], account: &str) -> Result<(), SessionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SessionError::StorageWriteFailed {
                reason: "disk full".to_string(),
            });
        }
        self.insert_raw(account, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_value(&self, account: &str) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(self
            .data
            .lock()
            .get(&self.namespace)
            .and_then(|ns| ns.get(account).cloned()))
    }

    async fn remove_value(&self, account: &str) -> Result<(), SessionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SessionError::StorageWriteFailed {
                reason: "read-only".to_string(),
            });
        }
        if let Some(ns) = self.data.lock().get_mut(&self.namespace) {
            ns.remove(account);
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Vec<u8>>, SessionError> {
        Ok(self
            .data
            .lock()
            .get(&self.namespace)
            .map(|ns| ns.values().cloned().collect())
            .unwrap_or_default())
    }

    fn shared(&self, access_group: &str) -> Result<Arc<dyn SecureKeyedStore>, SessionError> {
        check_namespace("shared access group", access_group)?;
        Ok(Arc::new(Self {
            namespace: format!("shared/{access_group}"),
            ..self.clone()
        }))
    }
}

type Scripted = Result<HttpResponse, HttpError>;

/// [`HttpClient`] answering from per-URL scripts and counting calls.
#[derive(Default)]
pub struct ScriptedHttpClient {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedHttpClient {
    /// Create a client with no scripts. Unscripted URLs answer 404.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.fallback
            .lock()
            .insert(url.to_string(), Ok(HttpResponse::new(status, body)));
    }

    /// Answer every call to `url` with a JSON body.
    pub fn respond_json(&self, url: &str, status: u16, body: &serde_json::Value) {
        self.respond(url, status, body.to_string());
    }

    /// Answer every call to `url` with a transport error.
    pub fn fail(&self, url: &str, error: HttpError) {
        self.fallback.lock().insert(url.to_string(), Err(error));
    }

    /// Answer the next call to `url` with `result`, before any fallback.
    pub fn enqueue(&self, url: &str, result: Result<HttpResponse, HttpError>) {
        self.queued
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of calls made to `url`.
    #[must_use]
    pub fn calls(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.url == url).count()
    }

    /// Total number of calls.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request made so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url.clone();
        self.requests.lock().push(request);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .get_mut(&url)
            .and_then(VecDeque::pop_front);
        if let Some(result) = queued {
            return result;
        }

        self.fallback
            .lock()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Ok(HttpResponse::new(404, Vec::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_shared_view() {
        let store = MemoryKeyedStore::new();
        store.set_value(b"a", "acct").await.unwrap();

        let shared = store.shared("group").unwrap();
        assert_eq!(shared.get_value("acct").await.unwrap(), None);
        shared.set_value(b"b", "acct").await.unwrap();

        assert_eq!(store.get_value("acct").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_queue_before_fallback() {
        let http = ScriptedHttpClient::new();
        http.respond("https://x/a", 200, "fallback");
        http.enqueue("https://x/a", Err(HttpError::Timeout));

        let first = http.execute(HttpRequest::get("https://x/a")).await;
        let second = http.execute(HttpRequest::get("https://x/a")).await.unwrap();
        let unknown = http.execute(HttpRequest::get("https://x/b")).await.unwrap();

        assert_eq!(first, Err(HttpError::Timeout));
        assert_eq!(second.body, b"fallback");
        assert_eq!(unknown.status, 404);
        assert_eq!(http.calls("https://x/a"), 2);
    }
}
