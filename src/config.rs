//! Shell configuration, loaded from a TOML shell manifest.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable that overrides the default shell manifest path.
pub const CONFIG_ENV: &str = "OFFLINE_SHELL_CONFIG";

/// The cache bucket and the assets to pre-cache into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Name of the cache bucket.
    pub name: String,
    /// Relative asset paths, in install order.
    pub assets: Vec<String>,
}

/// Where the shell is served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Scope URL; manifest entries resolve against it.
    pub scope: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            scope: "http://127.0.0.1:8501/".to_string(),
        }
    }
}

/// Network settings for install and fallback fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Number of assets fetched concurrently during install.
    pub concurrent_fetches: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrent_fetches: 4,
            timeout_secs: 30,
        }
    }
}

impl FetchConfig {
    /// Sets the number of concurrent install fetches.
    #[must_use]
    pub const fn with_concurrent_fetches(mut self, concurrent: usize) -> Self {
        self.concurrent_fetches = concurrent;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Cache store location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the persistent store. Defaults to the user data dir.
    pub dir: Option<PathBuf>,
    /// Keep caches in memory only; nothing survives the process.
    pub ephemeral: bool,
}

impl StorageConfig {
    /// Returns the configured store root, or the platform default.
    #[must_use]
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("offline-shell")
                .join("caches")
        })
    }
}

/// HTTP front settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Whether to answer with permissive CORS headers.
    pub cors: bool,
    /// Largest request body forwarded to the network.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9724,
            cors: false,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Complete shell configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Cache bucket and asset manifest.
    pub cache: CacheConfig,
    /// Scope the shell is served under.
    #[serde(default)]
    pub origin: OriginConfig,
    /// Network settings.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Store settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP front settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl ShellConfig {
    /// Creates a config for `name` and `assets` with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>, assets: Vec<String>) -> Self {
        Self {
            cache: CacheConfig {
                name: name.into(),
                assets,
            },
            origin: OriginConfig::default(),
            fetch: FetchConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Sets the scope URL.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.origin.scope = scope.into();
        self
    }

    /// Sets the store root directory.
    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.dir = Some(dir.into());
        self
    }

    /// Switches to the in-memory store.
    #[must_use]
    pub const fn with_ephemeral_storage(mut self, ephemeral: bool) -> Self {
        self.storage.ephemeral = ephemeral;
        self
    }

    /// Returns the default shell manifest path.
    ///
    /// Uses `OFFLINE_SHELL_CONFIG` when set, falling back to
    /// `$XDG_CONFIG_HOME/offline-shell/offline-shell.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            PathBuf::from(path)
        } else {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("offline-shell")
                .join("offline-shell.toml")
        }
    }

    /// Parses a shell manifest from TOML text.
    ///
    /// `source_name` labels the input in parse errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManifestParse`] with the offending line and column
    /// for TOML syntax or schema errors, and [`Error::Config`] for values that
    /// parse but make no sense.
    pub fn from_toml(source_name: &str, text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| {
            let offset = e.span().map_or(0, |span| span.start);
            Error::parse_at(source_name, text, offset, e.message())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a shell manifest from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&path.display().to_string(), &text)?;
        log::debug!("Loaded shell manifest from {}", path.display());
        Ok(config)
    }

    /// Renders the config back to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks settings that TOML types alone cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty cache name or zero concurrency.
    pub fn validate(&self) -> Result<()> {
        if self.cache.name.is_empty() {
            return Err(Error::EmptyCacheName);
        }
        if self.fetch.concurrent_fetches == 0 {
            return Err(Error::Config("fetch.concurrent_fetches must be at least 1".to_string()));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(Error::Config("fetch.timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}
