//! Asset manifest validation and resolution.

use std::collections::HashSet;

use reqwest::Url;

use crate::config::ShellConfig;
use crate::error::{Error, Result};
use crate::request::{CacheRequest, key_url};

/// A manifest entry together with the URL it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// The entry as written in the manifest.
    pub entry: String,
    /// Absolute request URL, fragment stripped.
    pub url: Url,
}

/// An ordered, validated list of assets to pre-cache.
///
/// Construction fails on the first bad entry, so a manifest that exists is
/// always fully installable as far as its own contents go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    scope: Url,
    assets: Vec<Asset>,
}

impl AssetManifest {
    /// Resolves `entries` against `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScope`] for a bad scope,
    /// [`Error::InvalidAsset`] for an entry that is empty, padded, absolute,
    /// unresolvable or cross-origin, and [`Error::DuplicateAsset`] when two
    /// entries resolve to the same request.
    pub fn new<S: AsRef<str>>(scope: &str, entries: &[S]) -> Result<Self> {
        let scope = parse_scope(scope)?;
        let mut seen = HashSet::new();
        let mut assets = Vec::with_capacity(entries.len());

        for entry in entries {
            let entry = entry.as_ref();
            let url = resolve_entry(&scope, entry)?;
            if !seen.insert(url.clone()) {
                return Err(Error::DuplicateAsset {
                    url: url.to_string(),
                });
            }
            assets.push(Asset {
                entry: entry.to_string(),
                url,
            });
        }

        Ok(Self { scope, assets })
    }

    /// Builds the manifest described by a shell config.
    ///
    /// # Errors
    ///
    /// See [`AssetManifest::new`].
    pub fn from_config(config: &ShellConfig) -> Result<Self> {
        Self::new(&config.origin.scope, &config.cache.assets)
    }

    /// The scope URL entries were resolved against.
    #[must_use]
    pub const fn scope(&self) -> &Url {
        &self.scope
    }

    /// The scope's origin, e.g. `http://127.0.0.1:8501`.
    #[must_use]
    pub fn origin(&self) -> String {
        self.scope.origin().ascii_serialization()
    }

    /// The resolved assets in manifest order.
    #[must_use]
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Number of assets.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.assets.len()
    }

    /// Returns true if there is nothing to pre-cache.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// The install-time request for every asset, in order.
    pub fn requests(&self) -> impl Iterator<Item = CacheRequest> + '_ {
        self.assets.iter().map(|asset| CacheRequest::get(asset.url.clone()))
    }
}

/// Parses and checks a scope URL.
///
/// # Errors
///
/// Returns [`Error::InvalidScope`] unless `scope` is an absolute http(s) URL
/// with a host.
pub fn parse_scope(scope: &str) -> Result<Url> {
    let invalid = |reason: String| Error::InvalidScope {
        scope: scope.to_string(),
        reason,
    };
    let url = Url::parse(scope).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

/// Resolves one manifest entry against the scope.
fn resolve_entry(scope: &Url, entry: &str) -> Result<Url> {
    let invalid = |reason: &str| Error::InvalidAsset {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    if entry.is_empty() {
        return Err(invalid("entry is empty"));
    }
    if entry.trim() != entry {
        return Err(invalid("entry has leading or trailing whitespace"));
    }
    if Url::parse(entry).is_ok() {
        return Err(invalid("entry must be a path relative to the scope"));
    }

    let url = scope
        .join(entry)
        .map_err(|e| invalid(&format!("cannot resolve: {e}")))?;
    if url.origin() != scope.origin() {
        return Err(invalid("entry resolves outside the scope's origin"));
    }
    Ok(key_url(&url))
}
