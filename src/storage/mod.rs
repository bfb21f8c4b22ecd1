//! Cache storage: named buckets of request/response entries.
//!
//! A store is scoped to one origin. Buckets are kept in creation order, which
//! is the order [`CacheStorage::match_any`] searches them in.

mod disk;
mod memory;

use async_trait::async_trait;
use reqwest::Url;

use crate::error::Result;
use crate::request::{CacheEntry, CacheRequest, CachedResponse};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Abstraction over a persistent, origin-scoped cache store.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the bucket `name`, creating it empty if it does not exist.
    async fn open(&self, name: &str) -> Result<()>;

    /// Returns true if the bucket `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Deletes the bucket `name` and its entries. Returns false if it did not
    /// exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Bucket names in creation order.
    async fn names(&self) -> Result<Vec<String>>;

    /// Stores `entries` in the bucket as one batch.
    ///
    /// Either every entry is committed or none is. An entry replaces any
    /// stored entry with the same method and URL.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()>;

    /// Key URLs of every entry in the bucket, in insertion order.
    async fn keys(&self, name: &str) -> Result<Vec<Url>>;

    /// Finds the response stored for `request` in the bucket `name`.
    async fn lookup(&self, name: &str, request: &CacheRequest) -> Result<Option<CachedResponse>>;

    /// Finds the first stored response for `request` across all buckets.
    async fn match_any(&self, request: &CacheRequest) -> Result<Option<CachedResponse>> {
        for name in self.names().await? {
            if let Some(response) = self.lookup(&name, request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// The store selected by configuration.
pub enum StorageBackend {
    /// In-memory store.
    Memory(MemoryStorage),
    /// On-disk store.
    Disk(DiskStorage),
}

#[async_trait]
impl CacheStorage for StorageBackend {
    async fn open(&self, name: &str) -> Result<()> {
        match self {
            Self::Memory(s) => s.open(name).await,
            Self::Disk(s) => s.open(name).await,
        }
    }

    async fn has(&self, name: &str) -> Result<bool> {
        match self {
            Self::Memory(s) => s.has(name).await,
            Self::Disk(s) => s.has(name).await,
        }
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match self {
            Self::Memory(s) => s.delete(name).await,
            Self::Disk(s) => s.delete(name).await,
        }
    }

    async fn names(&self) -> Result<Vec<String>> {
        match self {
            Self::Memory(s) => s.names().await,
            Self::Disk(s) => s.names().await,
        }
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        match self {
            Self::Memory(s) => s.put_all(name, entries).await,
            Self::Disk(s) => s.put_all(name, entries).await,
        }
    }

    async fn keys(&self, name: &str) -> Result<Vec<Url>> {
        match self {
            Self::Memory(s) => s.keys(name).await,
            Self::Disk(s) => s.keys(name).await,
        }
    }

    async fn lookup(&self, name: &str, request: &CacheRequest) -> Result<Option<CachedResponse>> {
        match self {
            Self::Memory(s) => s.lookup(name, request).await,
            Self::Disk(s) => s.lookup(name, request).await,
        }
    }
}

/// Hex SHA-256 of `bytes`, used for content and directory names.
pub(crate) fn hash(bytes: &[u8]) -> String {
    use sha2::Digest;
    format!("{:x}", sha2::Sha256::digest(bytes))
}

/// Replaces entries sharing a key with their replacements, appending the new
/// ones at the end.
pub(crate) fn merge_entries(existing: &mut Vec<CacheEntry>, incoming: Vec<CacheEntry>) {
    for entry in incoming {
        existing.retain(|e| !e.same_key(&entry));
        existing.push(entry);
    }
}
