//! On-disk cache storage.
//!
//! Layout under the store root (one directory per origin):
//!
//! ```text
//! <root>/<sha256(origin)>/
//!     origin                     the origin, for humans
//!     caches.json                bucket names in creation order
//!     buckets/<sha256(name)>/
//!         entries.json           request keys and response metadata
//!         bodies/<sha256(body)>  response bodies, content-addressed
//! ```
//!
//! Index files are replaced by writing a temporary file and renaming it, so a
//! reader sees either the old or the new index and never a partial one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{CacheStorage, hash};
use crate::error::{Error, Result};
use crate::request::{
    CacheEntry, CacheRequest, CachedResponse, deserialize_headers, serialize_headers,
};

const CATALOG_FILE: &str = "caches.json";
const ENTRIES_FILE: &str = "entries.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BucketRecord {
    name: String,
    created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryRecord {
    method: String,
    url: String,
    /// Base64 of the serialized request header block.
    request_headers: String,
    status: u16,
    /// Base64 of the serialized response header block.
    response_headers: String,
    body_key: String,
    body_len: u64,
    stored_at: DateTime<Utc>,
}

impl EntryRecord {
    fn encode(entry: &CacheEntry, stored_at: DateTime<Utc>) -> Self {
        Self {
            method: entry.method.to_string(),
            url: entry.url.to_string(),
            request_headers: BASE64.encode(serialize_headers(&entry.request_headers)),
            status: entry.response.status.as_u16(),
            response_headers: BASE64.encode(serialize_headers(&entry.response.headers)),
            body_key: hash(&entry.response.body),
            body_len: entry.response.body.len() as u64,
            stored_at,
        }
    }

    /// Decodes everything but the body, which stays empty.
    fn decode_meta(&self) -> Result<CacheEntry> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            Error::CorruptStore(format!("{what} of {}: {e}", self.url))
        };
        let method = Method::from_bytes(self.method.as_bytes()).map_err(|e| corrupt("method", &e))?;
        let url = Url::parse(&self.url).map_err(|e| corrupt("url", &e))?;
        let status = StatusCode::from_u16(self.status).map_err(|e| corrupt("status", &e))?;
        let request_headers = BASE64
            .decode(&self.request_headers)
            .map_err(|e| corrupt("request headers", &e))?;
        let response_headers = BASE64
            .decode(&self.response_headers)
            .map_err(|e| corrupt("response headers", &e))?;

        Ok(CacheEntry {
            method,
            url,
            request_headers: deserialize_headers(&request_headers)?,
            response: CachedResponse {
                status,
                headers: deserialize_headers(&response_headers)?,
                body: Bytes::new(),
            },
        })
    }
}

/// A persistent cache store rooted in a directory, scoped to one origin.
pub struct DiskStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskStorage {
    /// Opens (creating if needed) the store for `origin` under `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be created.
    pub async fn open_store(base: &Path, origin: &str) -> Result<Self> {
        let root = base.join(hash(origin.as_bytes()));
        tokio::fs::create_dir_all(root.join("buckets")).await?;
        tokio::fs::write(root.join("origin"), origin).await?;
        log::debug!("Cache store for {origin} at {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// The directory holding this origin's buckets.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, name: &str) -> PathBuf {
        self.root.join("buckets").join(hash(name.as_bytes()))
    }

    async fn read_catalog(&self) -> Result<Vec<BucketRecord>> {
        Ok(read_json(&self.root.join(CATALOG_FILE)).await?.unwrap_or_default())
    }

    async fn read_entries(&self, name: &str) -> Result<Vec<EntryRecord>> {
        read_json(&self.bucket_dir(name).join(ENTRIES_FILE))
            .await?
            .ok_or_else(|| Error::BucketNotFound(name.to_string()))
    }

    async fn ensure_exists(&self, name: &str) -> Result<()> {
        if self.read_catalog().await?.iter().any(|b| b.name == name) {
            Ok(())
        } else {
            Err(Error::BucketNotFound(name.to_string()))
        }
    }

    /// Writes a body under its content key unless it is already there.
    async fn write_body(bodies: &Path, key: &str, body: &Bytes) -> Result<()> {
        let path = bodies.join(key);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        let tmp = bodies.join(format!("{key}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Removes bodies no index entry refers to.
    async fn collect_garbage(bodies: &Path, records: &[EntryRecord]) -> Result<()> {
        let live: HashSet<&str> = records.iter().map(|r| r.body_key.as_str()).collect();
        let mut dir = tokio::fs::read_dir(bodies).await?;
        while let Some(item) = dir.next_entry().await? {
            let file_name = item.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !live.contains(file_name) {
                log::debug!("Removing unreferenced body {file_name}");
                if let Err(e) = tokio::fs::remove_file(item.path()).await {
                    log::warn!("Could not remove unreferenced body {file_name}: {e}");
                }
            }
        }
        Ok(())
    }

    async fn load_match(&self, name: &str, request: &CacheRequest) -> Result<Option<CachedResponse>> {
        for record in self.read_entries(name).await? {
            let mut entry = record.decode_meta()?;
            if !entry.matches(request) {
                continue;
            }
            let body_path = self.bucket_dir(name).join("bodies").join(&record.body_key);
            let body = tokio::fs::read(&body_path).await?;
            if body.len() as u64 != record.body_len {
                return Err(Error::CorruptStore(format!(
                    "body of {} is {} bytes, index says {}",
                    record.url,
                    body.len(),
                    record.body_len
                )));
            }
            entry.response.body = Bytes::from(body);
            return Ok(Some(entry.response));
        }
        Ok(None)
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::EmptyCacheName);
        }
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.read_catalog().await?;
        if catalog.iter().any(|b| b.name == name) {
            return Ok(());
        }

        let dir = self.bucket_dir(name);
        tokio::fs::create_dir_all(dir.join("bodies")).await?;
        write_json_atomic(&dir.join(ENTRIES_FILE), &Vec::<EntryRecord>::new()).await?;

        catalog.push(BucketRecord {
            name: name.to_string(),
            created: Utc::now(),
        });
        write_json_atomic(&self.root.join(CATALOG_FILE), &catalog).await?;
        log::info!("Created cache bucket {name}");
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.read_catalog().await?.iter().any(|b| b.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut catalog = self.read_catalog().await?;
        let before = catalog.len();
        catalog.retain(|b| b.name != name);
        if catalog.len() == before {
            return Ok(false);
        }
        write_json_atomic(&self.root.join(CATALOG_FILE), &catalog).await?;

        match tokio::fs::remove_dir_all(self.bucket_dir(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        log::info!("Deleted cache bucket {name}");
        Ok(true)
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self.read_catalog().await?.into_iter().map(|b| b.name).collect())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_exists(name).await?;

        let dir = self.bucket_dir(name);
        let bodies = dir.join("bodies");
        tokio::fs::create_dir_all(&bodies).await?;

        // Bodies first; the index rename below is the commit point.
        for entry in &entries {
            Self::write_body(&bodies, &hash(&entry.response.body), &entry.response.body).await?;
        }

        let mut records = self.read_entries(name).await?;
        let now = Utc::now();
        for entry in &entries {
            let method = entry.method.as_str();
            let url = entry.url.as_str();
            records.retain(|r| !(r.method == method && r.url == url));
            records.push(EntryRecord::encode(entry, now));
        }

        write_json_atomic(&dir.join(ENTRIES_FILE), &records).await?;
        Self::collect_garbage(&bodies, &records).await?;
        log::debug!("Committed {} entries to {name}", entries.len());
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<Url>> {
        self.read_entries(name)
            .await?
            .iter()
            .map(|r| {
                Url::parse(&r.url).map_err(|e| Error::CorruptStore(format!("url {}: {e}", r.url)))
            })
            .collect()
    }

    async fn lookup(&self, name: &str, request: &CacheRequest) -> Result<Option<CachedResponse>> {
        // A concurrent commit may collect a body between our index read and
        // the body read; the fresh index no longer points at it.
        match self.load_match(name, request).await {
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.load_match(name, request).await
            }
            other => other,
        }
    }
}

/// Reads a JSON file, returning `None` if it does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes JSON atomically (write tmp + rename).
async fn write_json_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{CONTENT_TYPE, HeaderValue, VARY};
    use tempfile::TempDir;

    const ORIGIN: &str = "http://127.0.0.1:8501";

    fn request(path: &str) -> CacheRequest {
        CacheRequest::get(Url::parse(ORIGIN).unwrap().join(path).unwrap())
    }

    fn entry(path: &str, body: &'static str) -> CacheEntry {
        let response = CachedResponse::new(StatusCode::OK, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        CacheEntry::new(&request(path), response)
    }

    async fn store(dir: &TempDir) -> DiskStorage {
        DiskStorage::open_store(dir.path(), ORIGIN).await.unwrap()
    }

    fn body_files(storage: &DiskStorage, name: &str) -> usize {
        std::fs::read_dir(storage.bucket_dir(name).join("bodies")).unwrap().count()
    }

    #[tokio::test]
    async fn open_creates_bucket_once() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("finance-os-v1").await.unwrap();
        storage.open("finance-os-v1").await.unwrap();
        assert_eq!(storage.names().await.unwrap(), vec!["finance-os-v1"]);
        assert!(storage.has("finance-os-v1").await.unwrap());
        assert!(storage.keys("finance-os-v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stored_response_round_trips() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("v1").await.unwrap();

        let mut original = CachedResponse::new(StatusCode::OK, vec![0u8, 159, 146, 150, 255])
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .with_header("x-raw".parse().unwrap(), HeaderValue::from_bytes(b"\xff\xfe").unwrap());
        original = original.with_header("x-raw".parse().unwrap(), HeaderValue::from_static("second"));
        storage
            .put_all("v1", vec![CacheEntry::new(&request("blob.bin"), original.clone())])
            .await
            .unwrap();

        let loaded = storage.lookup("v1", &request("blob.bin")).await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = store(&dir).await;
            storage.open("v1").await.unwrap();
            storage.put_all("v1", vec![entry("index.html", "<html>")]).await.unwrap();
        }
        let storage = store(&dir).await;
        assert!(storage.has("v1").await.unwrap());
        let hit = storage.lookup("v1", &request("index.html")).await.unwrap().unwrap();
        assert_eq!(hit.body, "<html>");
    }

    #[tokio::test]
    async fn origins_are_isolated() {
        let dir = TempDir::new().unwrap();
        let a = DiskStorage::open_store(dir.path(), "http://a.test").await.unwrap();
        let b = DiskStorage::open_store(dir.path(), "http://b.test").await.unwrap();
        a.open("v1").await.unwrap();
        assert!(!b.has("v1").await.unwrap());
        assert_ne!(a.root(), b.root());
    }

    #[tokio::test]
    async fn reinstall_keeps_key_set_and_collects_old_bodies() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("v1").await.unwrap();
        storage
            .put_all("v1", vec![entry("a", "one"), entry("b", "two")])
            .await
            .unwrap();
        storage
            .put_all("v1", vec![entry("a", "uno"), entry("b", "two")])
            .await
            .unwrap();

        let keys: Vec<_> = storage.keys("v1").await.unwrap().iter().map(|u| u.path().to_string()).collect();
        assert_eq!(keys, vec!["/a", "/b"]);
        assert_eq!(body_files(&storage, "v1"), 2);
        let hit = storage.lookup("v1", &request("a")).await.unwrap().unwrap();
        assert_eq!(hit.body, "uno");
    }

    #[tokio::test]
    async fn body_that_cannot_be_removed_does_not_fail_commit() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("v1").await.unwrap();
        storage.put_all("v1", vec![entry("a", "1")]).await.unwrap();
        let stray = storage.bucket_dir("v1").join("bodies").join("stray");
        std::fs::create_dir(&stray).unwrap();

        storage.put_all("v1", vec![entry("b", "2")]).await.unwrap();
        assert!(stray.is_dir());
        assert_eq!(storage.keys("v1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn partial_put_keeps_other_entries() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("v1").await.unwrap();
        storage.put_all("v1", vec![entry("a", "1"), entry("b", "2")]).await.unwrap();
        storage.put_all("v1", vec![entry("c", "3")]).await.unwrap();

        assert_eq!(storage.keys("v1").await.unwrap().len(), 3);
        let b = storage.lookup("v1", &request("b")).await.unwrap().unwrap();
        assert_eq!(b.body, "2");
    }

    #[tokio::test]
    async fn identical_bodies_share_one_file() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("v1").await.unwrap();
        storage.put_all("v1", vec![entry("a", "same"), entry("b", "same")]).await.unwrap();
        assert_eq!(body_files(&storage, "v1"), 1);
    }

    #[tokio::test]
    async fn put_into_unopened_bucket_fails() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        assert!(matches!(
            storage.put_all("v1", vec![entry("a", "x")]).await,
            Err(Error::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn vary_is_honored_after_reload() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("v1").await.unwrap();
        let cached = request("a").with_header("accept-language".parse().unwrap(), HeaderValue::from_static("en"));
        let response = CachedResponse::new(StatusCode::OK, "hello")
            .with_header(VARY, HeaderValue::from_static("Accept-Language"));
        storage.put_all("v1", vec![CacheEntry::new(&cached, response)]).await.unwrap();

        let english = request("a").with_header("accept-language".parse().unwrap(), HeaderValue::from_static("en"));
        let french = request("a").with_header("accept-language".parse().unwrap(), HeaderValue::from_static("fr"));
        assert!(storage.lookup("v1", &english).await.unwrap().is_some());
        assert!(storage.lookup("v1", &french).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_files() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("v1").await.unwrap();
        storage.put_all("v1", vec![entry("a", "x")]).await.unwrap();
        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.bucket_dir("v1").exists());
        assert!(!storage.delete("v1").await.unwrap());
        assert!(matches!(storage.keys("v1").await, Err(Error::BucketNotFound(_))));
    }

    #[tokio::test]
    async fn missing_body_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = store(&dir).await;
        storage.open("v1").await.unwrap();
        storage.put_all("v1", vec![entry("a", "x")]).await.unwrap();
        let bodies = storage.bucket_dir("v1").join("bodies");
        for file in std::fs::read_dir(&bodies).unwrap() {
            std::fs::remove_file(file.unwrap().path()).unwrap();
        }
        assert!(storage.lookup("v1", &request("a")).await.is_err());
    }

    #[test]
    fn record_encodes_body_key_and_length() {
        let record = EntryRecord::encode(&entry("a", "abc"), Utc::now());
        assert_eq!(record.body_key, hash(b"abc"));
        assert_eq!(record.body_len, 3);
        assert_eq!(record.status, 200);
        assert_eq!(record.method, "GET");
    }
}
