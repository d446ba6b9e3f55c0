//! Optional certificate persistence
//!
//! The manager only consumes this interface. Entries are keyed by domain and
//! hold the PEM form of a [`CertificateHandle`](super::CertificateHandle).

use async_trait::async_trait;
use dashmap::DashMap;

use super::error::CacheError;

/// Byte store for issued certificates
#[async_trait]
pub trait CertCache: Send + Sync {
    /// Fetch an entry, [`CacheError::NotFound`] if there is none
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError>;

    /// Remove an entry; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local [`CertCache`]
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CertCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(CacheError::NotFound)
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}
