//! AES-256-GCM encrypted, file-backed [`SecureKeyedStore`].
//!
//! Layout: one file per account key under `<root>/<service>/`, or
//! `<root>/shared/<access_group>/<service>/` for a shared access group.
//! File names are the base64url SHA-256 of the account key, and each file
//! holds `nonce || ciphertext` with the file name bound as associated data.

use super::keyed::{SecureKeyedStore, check_namespace};
use crate::error::SessionError;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const TEMP_PREFIX: &str = ".tmp-";

/// Encrypted file store for one service namespace.
pub struct EncryptedFileStore {
    root: PathBuf,
    dir: PathBuf,
    service: String,
    key: Zeroizing<[u8; 32]>,
    cipher: Aes256Gcm,
}

impl EncryptedFileStore {
    /// Store under `<root>/<service>/`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `service` is not a plain directory name.
    pub fn new(
        root: impl Into<PathBuf>,
        service: impl Into<String>,
        key: [u8; 32],
    ) -> Result<Self, SessionError> {
        let root = root.into();
        let service = service.into();
        check_namespace("service namespace", &service)?;
        let dir = root.join(&service);
        Ok(Self::with_dir(root, dir, service, key))
    }

    fn with_dir(root: PathBuf, dir: PathBuf, service: String, key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
            key: Zeroizing::new(key),
            root,
            dir,
            service,
        }
    }

    /// Directory holding this namespace's files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(account: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(account.as_bytes()))
    }

    fn encrypt(&self, data: &[u8], aad: &str) -> Result<Vec<u8>, SessionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: data,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| SessionError::storage_write(format!("Encryption failed: {e}")))?;

        let mut result = nonce_bytes.to_vec();
        result.extend(ciphertext);
        Ok(result)
    }

    fn decrypt(&self, data: &[u8], aad: &str) -> Result<Vec<u8>, SessionError> {
        if data.len() < NONCE_LEN {
            return Err(SessionError::storage_read("Data too short for decryption"));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| SessionError::storage_read(format!("Decryption failed: {e}")))
    }

    async fn write_atomic(&self, name: &str, contents: &[u8]) -> Result<(), SessionError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SessionError::storage_write(format!("Failed to create store dir: {e}")))?;

        let temp = self
            .dir
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4().simple()));
        let target = self.dir.join(name);

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                debug!(error = %cleanup, "Temp file cleanup failed");
            }
            return Err(SessionError::storage_write(format!(
                "Failed to persist value: {e}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SecureKeyedStore for EncryptedFileStore {
    #[instrument(skip(self, value), fields(service = %self.service, account = %account))]
    async fn set_value(&self, value: &[u8], account: &str) -> Result<(), SessionError> {
        let name = Self::file_name(account);
        let sealed = self.encrypt(value, &name)?;
        self.write_atomic(&name, &sealed).await?;
        debug!("Value stored");
        Ok(())
    }

    #[instrument(skip(self), fields(service = %self.service, account = %account))]
    async fn get_value(&self, account: &str) -> Result<Option<Vec<u8>>, SessionError> {
        let name = Self::file_name(account);
        match fs::read(self.dir.join(&name)).await {
            Ok(sealed) => self.decrypt(&sealed, &name).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::storage_read(format!("Failed to read value: {e}"))),
        }
    }

    #[instrument(skip(self), fields(service = %self.service, account = %account))]
    async fn remove_value(&self, account: &str) -> Result<(), SessionError> {
        match fs::remove_file(self.dir.join(Self::file_name(account))).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::storage_write(format!(
                "Failed to remove value: {e}"
            ))),
        }
    }

    #[instrument(skip(self), fields(service = %self.service))]
    async fn get_all(&self) -> Result<Vec<Vec<u8>>, SessionError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SessionError::storage_read(format!(
                    "Failed to list store: {e}"
                )));
            }
        };

        let mut values = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(SessionError::storage_read(format!(
                        "Failed to list store: {e}"
                    )));
                }
            };

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }

            let sealed = match fs::read(entry.path()).await {
                Ok(sealed) => sealed,
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            match self.decrypt(&sealed, &name) {
                Ok(value) => values.push(value),
                Err(e) => warn!(file = %name, error = %e, "Skipping undecryptable entry"),
            }
        }

        Ok(values)
    }

    fn shared(&self, access_group: &str) -> Result<Arc<dyn SecureKeyedStore>, SessionError> {
        check_namespace("shared access group", access_group)?;
        let dir = self
            .root
            .join("shared")
            .join(access_group)
            .join(&self.service);
        Ok(Arc::new(Self::with_dir(
            self.root.clone(),
            dir,
            self.service.clone(),
            *self.key,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> EncryptedFileStore {
        EncryptedFileStore::new(root, "com.example.app", [7u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());

        store.set_value(b"hello", "acct-1").await.unwrap();
        assert_eq!(store.get_value("acct-1").await.unwrap(), Some(b"hello".to_vec()));

        store.set_value(b"world", "acct-1").await.unwrap();
        assert_eq!(store.get_value("acct-1").await.unwrap(), Some(b"world".to_vec()));

        store.remove_value("acct-1").await.unwrap();
        assert_eq!(store.get_value("acct-1").await.unwrap(), None);
        store.remove_value("acct-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_values_are_encrypted_at_rest() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        store.set_value(b"plaintext-token", "acct-1").await.unwrap();

        let path = store.dir().join(EncryptedFileStore::file_name("acct-1"));
        let raw = std::fs::read(path).unwrap();
        assert!(!raw.windows(15).any(|w| w == b"plaintext-token"));
    }

    #[tokio::test]
    async fn test_wrong_key_cannot_read() {
        let root = tempfile::tempdir().unwrap();
        store(root.path()).set_value(b"secret", "acct-1").await.unwrap();

        let other = EncryptedFileStore::new(root.path(), "com.example.app", [8u8; 32]).unwrap();
        assert!(matches!(
            other.get_value("acct-1").await,
            Err(SessionError::StorageReadFailed { .. })
        ));
        assert!(other.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_swapped_files_fail_authentication() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        store.set_value(b"one", "acct-1").await.unwrap();

        let from = store.dir().join(EncryptedFileStore::file_name("acct-1"));
        let to = store.dir().join(EncryptedFileStore::file_name("acct-2"));
        std::fs::copy(from, to).unwrap();

        assert!(store.get_value("acct-2").await.is_err());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let a = EncryptedFileStore::new(root.path(), "app-a", [7u8; 32]).unwrap();
        let b = EncryptedFileStore::new(root.path(), "app-b", [7u8; 32]).unwrap();

        a.set_value(b"a", "acct").await.unwrap();
        assert_eq!(b.get_value("acct").await.unwrap(), None);

        let shared = a.shared("group.example").unwrap();
        assert_eq!(shared.get_value("acct").await.unwrap(), None);
        shared.set_value(b"handoff", "acct").await.unwrap();

        assert_eq!(
            b.shared("group.example").unwrap().get_value("acct").await.unwrap(),
            None
        );
        let sibling = EncryptedFileStore::new(root.path(), "app-a", [7u8; 32]).unwrap();
        assert_eq!(
            sibling
                .shared("group.example")
                .unwrap()
                .get_value("acct")
                .await
                .unwrap(),
            Some(b"handoff".to_vec())
        );
    }

    #[test]
    fn test_path_like_names_never_reach_the_filesystem() {
        let root = tempfile::tempdir().unwrap();

        for service in ["../outside", "a/b", ".", ""] {
            assert!(matches!(
                EncryptedFileStore::new(root.path(), service, [7u8; 32]),
                Err(SessionError::Configuration(_))
            ));
        }
        for group in ["../../etc", "a\\b", ".hidden", " "] {
            assert!(matches!(
                store(root.path()).shared(group),
                Err(SessionError::Configuration(_))
            ));
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_get_all_on_missing_dir_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(store(root.path()).get_all().await.unwrap().is_empty());
    }
}
