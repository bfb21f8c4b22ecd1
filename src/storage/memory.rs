//! In-memory cache storage.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Url;

use super::{CacheStorage, merge_entries};
use crate::error::{Error, Result};
use crate::request::{CacheEntry, CacheRequest, CachedResponse};

struct Bucket {
    name: String,
    entries: Vec<CacheEntry>,
}

/// A cache store that lives for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStorage {
    buckets: Mutex<Vec<Bucket>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bucket<T>(&self, name: &str, f: impl FnOnce(&mut Bucket) -> T) -> Result<T> {
        let mut buckets = self.buckets.lock().map_err(|_| poisoned())?;
        buckets
            .iter_mut()
            .find(|b| b.name == name)
            .map(f)
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))
    }
}

fn poisoned() -> Error {
    Error::CorruptStore("memory store lock poisoned".to_string())
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::EmptyCacheName);
        }
        let mut buckets = self.buckets.lock().map_err(|_| poisoned())?;
        if !buckets.iter().any(|b| b.name == name) {
            buckets.push(Bucket {
                name: name.to_string(),
                entries: Vec::new(),
            });
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let buckets = self.buckets.lock().map_err(|_| poisoned())?;
        Ok(buckets.iter().any(|b| b.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut buckets = self.buckets.lock().map_err(|_| poisoned())?;
        let before = buckets.len();
        buckets.retain(|b| b.name != name);
        Ok(buckets.len() != before)
    }

    async fn names(&self) -> Result<Vec<String>> {
        let buckets = self.buckets.lock().map_err(|_| poisoned())?;
        Ok(buckets.iter().map(|b| b.name.clone()).collect())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        self.with_bucket(name, |bucket| merge_entries(&mut bucket.entries, entries))
    }

    async fn keys(&self, name: &str) -> Result<Vec<Url>> {
        self.with_bucket(name, |bucket| bucket.entries.iter().map(|e| e.url.clone()).collect())
    }

    async fn lookup(&self, name: &str, request: &CacheRequest) -> Result<Option<CachedResponse>> {
        self.with_bucket(name, |bucket| {
            bucket
                .entries
                .iter()
                .find(|e| e.matches(request))
                .map(|e| e.response.clone())
        })
    }
}
