//! offline-shell - an offline-first cache shell for a multi-page web app.
//!
//! On install the shell fetches every asset in its manifest and commits the
//! responses to a named cache bucket in one batch. Afterwards requests are
//! answered cache-first with a network fallback; misses never write to the
//! cache.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_shell::{CacheRequest, InstallProgress, NoProgress, OfflineShell, ShellConfig};
//!
//! # async fn example() -> offline_shell::Result<()> {
//! let config = ShellConfig::new("finance-os-v1", vec!["./".into(), "./Home.py".into()])
//!     .with_scope("http://127.0.0.1:8501/");
//! let shell = OfflineShell::from_config(&config).await?;
//!
//! let progress: Arc<dyn InstallProgress> = Arc::new(NoProgress);
//! let report = shell.install(&progress).await?;
//! println!("Cached {} assets", report.assets_cached);
//!
//! let url = shell.manifest().scope().join("Home.py").expect("valid path");
//! let fetched = shell.fetch(&CacheRequest::get(url)).await?;
//! println!("{:?}: {} bytes", fetched.source, fetched.response.body.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod host;
pub mod manifest;
pub mod network;
pub mod request;
pub mod script;
pub mod shell;
pub mod stats;
pub mod storage;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "server")]
pub mod server;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{CONFIG_ENV, ShellConfig};
pub use error::{Error, Result};
pub use host::{EventKind, HostHandle, LifecycleHandler, WorkerHost};
pub use manifest::{Asset, AssetManifest};
pub use network::{Network, ReqwestNetwork};
pub use request::{CacheEntry, CacheRequest, CachedResponse};
pub use script::{ImportedWorker, parse_worker_script};
pub use shell::{FetchSource, Fetched, InstallProgress, NoProgress, OfflineShell, ShellState};
pub use stats::InstallReport;
pub use storage::{CacheStorage, DiskStorage, MemoryStorage, StorageBackend};
