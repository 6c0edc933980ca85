//! Secure keyed store capability.

use crate::error::SessionError;
use async_trait::async_trait;
use std::sync::Arc;

/// Durable store of one opaque blob per account key.
///
/// Keys are scoped to a service namespace. Every write must either persist
/// or return an error; implementations never fall back to memory.
#[async_trait]
pub trait SecureKeyedStore: Send + Sync {
    /// Store `value` for `account`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if the value was not persisted.
    async fn set_value(&self, value: &[u8], account: &str) -> Result<(), SessionError>;

    /// Read the value for `account`.
    ///
    /// # Errors
    ///
    /// Returns `StorageReadFailed` if a stored value exists but cannot be read.
    async fn get_value(&self, account: &str) -> Result<Option<Vec<u8>>, SessionError>;

    /// Remove the value for `account`. Removing an absent value succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StorageWriteFailed` if an existing value could not be removed.
    async fn remove_value(&self, account: &str) -> Result<(), SessionError>;

    /// All readable values in the namespace, in no particular order.
    /// Unreadable entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StorageReadFailed` if the namespace itself cannot be listed.
    async fn get_all(&self) -> Result<Vec<Vec<u8>>, SessionError>;

    /// The same service namespace inside a shared access group, readable and
    /// writable by other processes of the same trust group.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `access_group` is not a plain name.
    fn shared(&self, access_group: &str) -> Result<Arc<dyn SecureKeyedStore>, SessionError>;
}

/// Namespaces and access groups name directories, so only plain names are
/// accepted: non-blank, no path separators, no leading `.`.
///
/// # Errors
///
/// Returns `Configuration` naming `what` if `name` is not a plain name.
pub fn check_namespace(what: &str, name: &str) -> Result<(), SessionError> {
    if name.trim().is_empty() || name.contains(['/', '\\', '\0']) || name.starts_with('.') {
        return Err(SessionError::Configuration(format!(
            "{what} must be a plain name: {name:?}"
        )));
    }
    Ok(())
}
