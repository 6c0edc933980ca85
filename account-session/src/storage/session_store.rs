//! Typed session persistence over a [`SecureKeyedStore`].

use super::keyed::SecureKeyedStore;
use super::record::SessionRecord;
use crate::error::SessionError;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Session records keyed by account key.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn SecureKeyedStore>,
}

impl SessionStore {
    /// Wrap a keyed store.
    #[must_use]
    pub fn new(store: Arc<dyn SecureKeyedStore>) -> Self {
        Self { store }
    }

    /// Underlying keyed store.
    #[must_use]
    pub fn keyed_store(&self) -> &Arc<dyn SecureKeyedStore> {
        &self.store
    }

    /// Session store over the shared access group namespace.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `access_group` is not a plain name.
    pub fn shared(&self, access_group: &str) -> Result<Self, SessionError> {
        self.store.shared(access_group).map(Self::new)
    }

    /// Persist a record, replacing the previous one for its account key.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the record was not persisted.
    #[instrument(skip(self, record), fields(account_key = %record.account_key))]
    pub async fn store(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let bytes = record.to_bytes()?;
        self.store.set_value(&bytes, &record.account_key).await?;
        debug!("Session stored");
        Ok(())
    }

    /// Load the record for `account_key`.
    ///
    /// # Errors
    ///
    /// `StorageReadFailed` if the blob cannot be read, `DeserializationFailed`
    /// if it is not a session record for this account key.
    #[instrument(skip(self))]
    pub async fn get(&self, account_key: &str) -> Result<Option<SessionRecord>, SessionError> {
        let Some(bytes) = self.store.get_value(account_key).await? else {
            return Ok(None);
        };

        let record = SessionRecord::from_bytes(&bytes)?;
        if record.account_key != account_key {
            return Err(SessionError::deserialization(format!(
                "Stored session belongs to {}",
                record.account_key
            )));
        }
        Ok(Some(record))
    }

    /// Raw persisted blob for `account_key`.
    ///
    /// # Errors
    ///
    /// `StorageReadFailed` if the blob cannot be read.
    pub async fn get_raw(&self, account_key: &str) -> Result<Option<Vec<u8>>, SessionError> {
        self.store.get_value(account_key).await
    }

    /// Store a raw blob after checking it decodes as a session.
    ///
    /// # Errors
    ///
    /// `DeserializationFailed` or `StorageWriteFailed`.
    pub async fn put_raw(&self, account_key: &str, bytes: &[u8]) -> Result<(), SessionError> {
        SessionRecord::from_bytes(bytes)?;
        self.store.set_value(bytes, account_key).await
    }

    /// All decodable sessions, most recently updated first.
    ///
    /// Entries that fail to decode are skipped.
    ///
    /// # Errors
    ///
    /// `StorageReadFailed` if the namespace cannot be listed.
    #[instrument(skip(self))]
    pub async fn get_all(&self) -> Result<Vec<SessionRecord>, SessionError> {
        let mut records: Vec<SessionRecord> = self
            .store
            .get_all()
            .await?
            .iter()
            .filter_map(|bytes| match SessionRecord::from_bytes(bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable session");
                    None
                }
            })
            .collect();

        records.sort_by_key(|r| Reverse(r.updated_at));
        Ok(records)
    }

    /// Remove the record for `account_key`. Absent records are not an error.
    ///
    /// # Errors
    ///
    /// `StorageWriteFailed` if an existing record could not be removed.
    #[instrument(skip(self))]
    pub async fn remove(&self, account_key: &str) -> Result<(), SessionError> {
        self.store.remove_value(account_key).await
    }
}
