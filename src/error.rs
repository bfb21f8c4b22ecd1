//! Error types for the offline-shell library.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur while installing or serving the shell.
#[derive(Error, Debug)]
pub enum Error {
    /// The shell manifest or an imported script failed to parse.
    #[error("manifest parse error in {source_name} at line {line}, column {column}: {message}")]
    ManifestParse {
        /// File name or label of the parsed input.
        source_name: String,
        /// 1-based line of the offending token.
        line: usize,
        /// 1-based column of the offending token.
        column: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// A manifest entry is not a usable relative asset path.
    #[error("invalid asset entry {entry:?}: {reason}")]
    InvalidAsset {
        /// The entry as written in the manifest.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two manifest entries resolve to the same request.
    #[error("duplicate asset request: {url}")]
    DuplicateAsset {
        /// The resolved URL both entries map to.
        url: String,
    },

    /// The configured scope is not an absolute http(s) URL.
    #[error("invalid scope URL {scope:?}: {reason}")]
    InvalidScope {
        /// The scope as configured.
        scope: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Cache names cannot be empty.
    #[error("cache name cannot be empty")]
    EmptyCacheName,

    /// An asset fetched during install returned a non-success status.
    #[error("asset {url} returned {status}")]
    AssetStatus {
        /// The asset URL.
        url: String,
        /// The status the network returned.
        status: StatusCode,
    },

    /// An asset response cannot be stored in a cache bucket.
    #[error("asset {url} cannot be cached: {reason}")]
    UnsupportedResponse {
        /// The asset URL.
        url: String,
        /// Why the response was refused.
        reason: &'static str,
    },

    /// The named cache bucket has not been opened.
    #[error("cache bucket not found: {0}")]
    BucketNotFound(String),

    /// The on-disk cache store holds data that cannot be decoded.
    #[error("corrupt cache store: {0}")]
    CorruptStore(String),

    /// The lifecycle host is no longer accepting events.
    #[error("lifecycle host is not running")]
    HostClosed,

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during storage operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache index (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds a [`Error::ManifestParse`] from a byte offset into `text`.
    #[must_use]
    pub fn parse_at(source_name: &str, text: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = line_column(text, offset);
        Self::ManifestParse {
            source_name: source_name.to_string(),
            line,
            column,
            message: message.into(),
        }
    }
}

/// Converts a byte offset into a 1-based line and column.
fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(text.len());
    let prefix = &text.as_bytes()[..offset];
    let line = prefix.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = prefix.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);
    let column = String::from_utf8_lossy(&prefix[line_start..]).chars().count() + 1;
    (line, column)
}

/// A specialized `Result` type for offline-shell operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_column_first_line() {
        assert_eq!(line_column("abc", 0), (1, 1));
        assert_eq!(line_column("abc", 2), (1, 3));
    }

    #[test]
    fn line_column_after_newlines() {
        let text = "one\ntwo\nthree";
        assert_eq!(line_column(text, 4), (2, 1));
        assert_eq!(line_column(text, 10), (3, 3));
    }

    #[test]
    fn line_column_clamps_offset() {
        assert_eq!(line_column("ab\n", 99), (2, 1));
    }

    #[test]
    fn parse_at_formats_position() {
        let err = Error::parse_at("sw.js", "a\nbc", 3, "unexpected token");
        assert_eq!(
            err.to_string(),
            "manifest parse error in sw.js at line 2, column 2: unexpected token"
        );
    }
}
