//! The offline cache shell: install-time pre-caching and cache-first fetch.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{StreamExt, TryStreamExt, stream};
use reqwest::StatusCode;

use crate::config::ShellConfig;
use crate::error::{Error, Result};
use crate::manifest::AssetManifest;
use crate::network::{Network, ReqwestNetwork};
use crate::request::{CacheEntry, CacheRequest, CachedResponse};
use crate::stats::{InstallReport, InstallReportBuilder};
use crate::storage::{CacheStorage, DiskStorage, MemoryStorage, StorageBackend};

/// Lifecycle state of a shell. The only transition is
/// `NotInstalled -> Installed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// No install has succeeded yet; requests bypass the cache.
    NotInstalled,
    /// The bucket is populated and requests are served cache-first.
    Installed,
}

impl ShellState {
    /// Short name used in logs and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInstalled => "not-installed",
            Self::Installed => "installed",
        }
    }
}

/// Where a fetch response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// A stored entry matched.
    Cache,
    /// No entry matched; the network answered.
    Network,
    /// The shell is not installed and did not consult the cache.
    Passthrough,
}

/// The single response produced for an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Where the response came from.
    pub source: FetchSource,
    /// The response, unmodified.
    pub response: CachedResponse,
}

/// Trait for receiving install progress updates.
///
/// All methods have default no-op implementations.
pub trait InstallProgress: Send + Sync {
    /// Called when install starts.
    fn on_install_start(&self, _cache_name: &str, _assets: usize) {}

    /// Called when an asset has been fetched and staged.
    fn on_asset_cached(&self, _url: &str, _bytes: u64) {}

    /// Called when an asset fetch fails; install is about to fail.
    fn on_asset_failed(&self, _url: &str, _error: &str) {}

    /// Called after the bucket commit.
    fn on_install_complete(&self, _report: &InstallReport) {}

    /// Called when install fails for any reason.
    fn on_install_failed(&self, _error: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl InstallProgress for NoProgress {}

/// Offline cache shell over a network and a cache store.
pub struct OfflineShell<N: Network = ReqwestNetwork, S: CacheStorage = StorageBackend> {
    cache_name: String,
    manifest: AssetManifest,
    concurrent_fetches: usize,
    network: N,
    storage: S,
    installed: AtomicBool,
}

impl OfflineShell {
    /// Builds a shell from configuration: `reqwest` network plus the
    /// configured store (on disk unless `storage.ephemeral` is set).
    ///
    /// # Errors
    ///
    /// Returns an error if the config or manifest is invalid or the store
    /// cannot be opened.
    pub async fn from_config(config: &ShellConfig) -> Result<Self> {
        config.validate()?;
        let manifest = AssetManifest::from_config(config)?;
        let network = ReqwestNetwork::from_config(&config.fetch)?;
        let storage = if config.storage.ephemeral {
            StorageBackend::Memory(MemoryStorage::new())
        } else {
            let dir = config.storage.resolved_dir();
            StorageBackend::Disk(DiskStorage::open_store(&dir, &manifest.origin()).await?)
        };
        Ok(Self::with_parts(&config.cache.name, manifest, network, storage)?
            .with_concurrent_fetches(config.fetch.concurrent_fetches))
    }
}

impl<N: Network, S: CacheStorage> OfflineShell<N, S> {
    /// Creates a shell from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCacheName`] if `cache_name` is empty.
    pub fn with_parts(cache_name: &str, manifest: AssetManifest, network: N, storage: S) -> Result<Self> {
        if cache_name.is_empty() {
            return Err(Error::EmptyCacheName);
        }
        Ok(Self {
            cache_name: cache_name.to_string(),
            manifest,
            concurrent_fetches: 4,
            network,
            storage,
            installed: AtomicBool::new(false),
        })
    }

    /// Sets how many assets install fetches at once.
    #[must_use]
    pub fn with_concurrent_fetches(mut self, concurrent: usize) -> Self {
        self.concurrent_fetches = concurrent.max(1);
        self
    }

    /// The cache bucket name.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// The asset manifest.
    #[must_use]
    pub const fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    /// The network the shell falls back to.
    #[must_use]
    pub const fn network(&self) -> &N {
        &self.network
    }

    /// The cache store.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ShellState {
        if self.installed.load(Ordering::Acquire) {
            ShellState::Installed
        } else {
            ShellState::NotInstalled
        }
    }

    /// Returns true once an install has succeeded.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.state() == ShellState::Installed
    }

    /// Populates the cache bucket with every asset in the manifest.
    ///
    /// All assets are fetched (in manifest order, bounded concurrency) and
    /// staged before anything is written; the batch is then committed in one
    /// store operation. The first failing asset aborts the install and nothing
    /// is written.
    ///
    /// # Errors
    ///
    /// Returns the first asset failure: a network error,
    /// [`Error::AssetStatus`] for a non-2xx response, or
    /// [`Error::UnsupportedResponse`] for a partial or `Vary: *` response.
    /// Store errors are returned as-is.
    pub async fn install(&self, progress: &Arc<dyn InstallProgress>) -> Result<InstallReport> {
        log::info!(
            "Installing {} asset(s) into cache {}",
            self.manifest.len(),
            self.cache_name
        );
        progress.on_install_start(&self.cache_name, self.manifest.len());

        let mut builder = InstallReportBuilder::new(&self.cache_name);
        match self.populate(progress, &mut builder).await {
            Ok(()) => {
                self.installed.store(true, Ordering::Release);
                let report = builder.build();
                log::info!(
                    "Cache {} installed: {} asset(s), {} bytes",
                    report.cache_name,
                    report.assets_cached,
                    report.total_bytes
                );
                progress.on_install_complete(&report);
                Ok(report)
            }
            Err(e) => {
                log::error!("Install of cache {} failed: {e}", self.cache_name);
                progress.on_install_failed(&e.to_string());
                Err(e)
            }
        }
    }

    async fn populate(&self, progress: &Arc<dyn InstallProgress>, builder: &mut InstallReportBuilder) -> Result<()> {
        self.storage.open(&self.cache_name).await?;

        let entries: Vec<CacheEntry> = stream::iter(self.manifest.requests())
            .map(|request| self.fetch_asset(request, progress))
            .buffered(self.concurrent_fetches)
            .try_collect()
            .await?;

        for entry in &entries {
            builder.add_asset(entry.response.body.len() as u64);
        }
        self.storage.put_all(&self.cache_name, entries).await
    }

    async fn fetch_asset(&self, request: CacheRequest, progress: &Arc<dyn InstallProgress>) -> Result<CacheEntry> {
        let url = request.url.to_string();
        let result = match self.network.fetch(&request).await {
            Ok(response) => check_cacheable(&url, &response).map(|()| response),
            Err(e) => Err(e),
        };
        match result {
            Ok(response) => {
                log::debug!("Staged {url} ({} bytes)", response.body.len());
                progress.on_asset_cached(&url, response.body.len() as u64);
                Ok(CacheEntry::new(&request, response))
            }
            Err(e) => {
                progress.on_asset_failed(&url, &e.to_string());
                Err(e)
            }
        }
    }

    /// Marks the shell installed if its bucket already holds every asset.
    ///
    /// Returns whether the shell is now installed. Nothing is fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn resume(&self) -> Result<bool> {
        if !self.storage.has(&self.cache_name).await? {
            return Ok(false);
        }
        let keys: HashSet<_> = self.storage.keys(&self.cache_name).await?.into_iter().collect();
        let missing = self
            .manifest
            .assets()
            .iter()
            .filter(|asset| !keys.contains(&asset.url))
            .count();
        if missing > 0 {
            log::info!(
                "Cache {} is missing {missing} asset(s); install required",
                self.cache_name
            );
            return Ok(self.is_installed());
        }
        self.installed.store(true, Ordering::Release);
        log::info!("Resumed installed cache {}", self.cache_name);
        Ok(true)
    }

    /// Answers an intercepted request: cached entry first, network otherwise.
    ///
    /// Misses never write to the cache. Before install every request goes to
    /// the network.
    ///
    /// # Errors
    ///
    /// Returns the network error unchanged when nothing is cached and the
    /// network request fails.
    pub async fn fetch(&self, request: &CacheRequest) -> Result<Fetched> {
        if !self.is_installed() {
            log::debug!("Passthrough {} {}", request.method, request.url);
            let response = self.network.fetch(request).await?;
            return Ok(Fetched {
                source: FetchSource::Passthrough,
                response,
            });
        }

        match self.storage.match_any(request).await {
            Ok(Some(response)) => {
                log::debug!("Cache hit {} {}", request.method, request.url);
                return Ok(Fetched {
                    source: FetchSource::Cache,
                    response,
                });
            }
            Ok(None) => log::debug!("Cache miss {} {}", request.method, request.url),
            Err(e) => log::warn!("Cache lookup for {} failed, using network: {e}", request.url),
        }

        let response = self.network.fetch(request).await?;
        Ok(Fetched {
            source: FetchSource::Network,
            response,
        })
    }
}

/// Rejects responses a cache bucket must not hold.
fn check_cacheable(url: &str, response: &CachedResponse) -> Result<()> {
    if response.status == StatusCode::PARTIAL_CONTENT {
        return Err(Error::UnsupportedResponse {
            url: url.to_string(),
            reason: "partial content",
        });
    }
    if !response.status.is_success() {
        return Err(Error::AssetStatus {
            url: url.to_string(),
            status: response.status,
        });
    }
    if response.varies_on_everything() {
        return Err(Error::UnsupportedResponse {
            url: url.to_string(),
            reason: "response varies on every request header",
        });
    }
    Ok(())
}
