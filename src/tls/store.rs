//! Persistent storage for ACME account keys and issued certificates.
//!
//! The certificate manager never touches the filesystem directly; it goes through
//! a [`CertStore`], a small key/value blob store. [`DirStore`] keeps one file per
//! key in a directory (the default deployment), [`MemoryStore`] keeps everything
//! in memory for tests.
//!
//! [`AcmeCache`] adapts a store to the cache traits `rustls-acme` expects.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rustls_acme::{AccountCache, CertCache};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Certificate store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Key/value blob store for certificate material.
#[async_trait]
pub trait CertStore: Send + Sync {
    /// Fetch a blob, `None` if the key has never been stored.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// Filesystem-backed store: one file per key under `dir`.
///
/// The directory is created on the first write.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl CertStore for DirStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.path_for(key);
        tokio::fs::write(&path, data)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }
}

/// In-memory store. Contents are lost when the last clone is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CertStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

/// Derive a store key from a list of names and the ACME directory.
///
/// Hashing the directory URL in keeps staging and production material apart
/// in a shared store.
pub fn cache_key(kind: &str, names: &[String], directory_url: &str) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(directory_url.as_bytes());

    let digest: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{kind}-{digest}")
}

/// `rustls-acme` cache backed by a [`CertStore`].
#[derive(Clone)]
pub struct AcmeCache {
    store: Arc<dyn CertStore>,
}

impl AcmeCache {
    pub fn new(store: Arc<dyn CertStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CertCache for AcmeCache {
    type EC = StoreError;

    async fn load_cert(
        &self,
        domains: &[String],
        directory_url: &str,
    ) -> Result<Option<Vec<u8>>, Self::EC> {
        let key = cache_key("cert", domains, directory_url);
        let cert = self.store.get(&key).await?;
        tracing::debug!(key = %key, found = cert.is_some(), "Loaded cached certificate");
        Ok(cert)
    }

    async fn store_cert(
        &self,
        domains: &[String],
        directory_url: &str,
        cert: &[u8],
    ) -> Result<(), Self::EC> {
        let key = cache_key("cert", domains, directory_url);
        tracing::info!(key = %key, domains = ?domains, "Caching issued certificate");
        self.store.put(&key, cert).await
    }
}

#[async_trait]
impl AccountCache for AcmeCache {
    type EA = StoreError;

    async fn load_account(
        &self,
        contact: &[String],
        directory_url: &str,
    ) -> Result<Option<Vec<u8>>, Self::EA> {
        self.store
            .get(&cache_key("account", contact, directory_url))
            .await
    }

    async fn store_account(
        &self,
        contact: &[String],
        directory_url: &str,
        account: &[u8],
    ) -> Result<(), Self::EA> {
        self.store
            .put(&cache_key("account", contact, directory_url), account)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LETS_ENCRYPT_PRODUCTION_URL, LETS_ENCRYPT_STAGING_URL};

    fn domains() -> Vec<String> {
        vec!["worker.example.com".to_string()]
    }

    #[test]
    fn test_cache_key_separates_directories() {
        let prod = cache_key("cert", &domains(), LETS_ENCRYPT_PRODUCTION_URL);
        let staging = cache_key("cert", &domains(), LETS_ENCRYPT_STAGING_URL);
        assert_ne!(prod, staging);
        assert!(prod.starts_with("cert-"));
        // "cert-" + 64 hex chars
        assert_eq!(prod.len(), 5 + 64);
    }

    #[test]
    fn test_cache_key_does_not_merge_name_boundaries() {
        let a = cache_key("cert", &["ab".to_string(), "c".to_string()], "x");
        let b = cache_key("cert", &["a".to_string(), "bc".to_string()], "x");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_memory_store_get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("cert-missing").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_dir_store_creates_directory_on_first_write() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("assets").join("cache");
        let store = DirStore::new(&dir);

        assert!(store.get("cert-abc").await.unwrap().is_none());
        store.put("cert-abc", b"pem bytes").await.unwrap();

        assert!(dir.is_dir());
        assert_eq!(store.get("cert-abc").await.unwrap().unwrap(), b"pem bytes");
    }

    #[tokio::test]
    async fn test_acme_cache_keeps_certs_and_accounts_apart() {
        let store = MemoryStore::new();
        let cache = AcmeCache::new(Arc::new(store.clone()));
        let names = domains();

        cache
            .store_cert(&names, LETS_ENCRYPT_STAGING_URL, b"cert")
            .await
            .unwrap();
        cache
            .store_account(&names, LETS_ENCRYPT_STAGING_URL, b"account")
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(
            cache
                .load_cert(&names, LETS_ENCRYPT_STAGING_URL)
                .await
                .unwrap()
                .unwrap(),
            b"cert"
        );
        assert!(cache
            .load_cert(&names, LETS_ENCRYPT_PRODUCTION_URL)
            .await
            .unwrap()
            .is_none());
    }
}
