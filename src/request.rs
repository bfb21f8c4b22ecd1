//! Request and response types stored in and served from cache buckets.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, VARY};
use reqwest::{Method, StatusCode, Url};

use crate::error::{Error, Result};

/// An intercepted request: what the host hands to the fetch handler.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body (empty for `GET`).
    pub body: Bytes,
}

impl CacheRequest {
    /// Creates a bodiless `GET` request for `url`.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the cache key URL: the request URL without its fragment.
    #[must_use]
    pub fn key_url(&self) -> Url {
        key_url(&self.url)
    }
}

/// Strips the fragment from a URL; fragments never reach the network.
#[must_use]
pub fn key_url(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// A full response payload: status, headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers, byte-for-byte as received.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl CachedResponse {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header, keeping any previous values.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Returns true when the `Vary` header contains `*`.
    #[must_use]
    pub fn varies_on_everything(&self) -> bool {
        vary_header_names(&self.headers).iter().any(|name| name == "*")
    }
}

/// A stored request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Method of the stored request (always `GET` for installed assets).
    pub method: Method,
    /// Key URL, fragment stripped.
    pub url: Url,
    /// Headers of the request that produced the response; consulted for `Vary`.
    pub request_headers: HeaderMap,
    /// The stored response.
    pub response: CachedResponse,
}

impl CacheEntry {
    /// Creates an entry keyed by `request`.
    #[must_use]
    pub fn new(request: &CacheRequest, response: CachedResponse) -> Self {
        Self {
            method: request.method.clone(),
            url: request.key_url(),
            request_headers: request.headers.clone(),
            response,
        }
    }

    /// Returns true when `request` should be answered by this entry.
    ///
    /// Only `GET` requests match, URLs are compared without fragments, and
    /// every header named by the stored response's `Vary` must agree.
    #[must_use]
    pub fn matches(&self, request: &CacheRequest) -> bool {
        request.method == Method::GET
            && self.method == Method::GET
            && self.url == request.key_url()
            && vary_header_matches(&self.response.headers, &request.headers, &self.request_headers)
    }

    /// Returns true when this entry occupies the same key as `other`.
    #[must_use]
    pub fn same_key(&self, other: &Self) -> bool {
        self.method == other.method && self.url == other.url
    }
}

/// Lowercased header names listed in all `Vary` headers of a response.
fn vary_header_names(response_headers: &HeaderMap) -> Vec<String> {
    response_headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Request headers added by the user agent or the connection rather than by
/// the page. Installed requests never carry them, so they take no part in
/// `Vary` matching.
const NETWORK_LAYER_HEADERS: &[&str] = &[
    "accept-charset",
    "accept-encoding",
    "access-control-request-headers",
    "access-control-request-method",
    "connection",
    "content-length",
    "cookie",
    "cookie2",
    "date",
    "dnt",
    "expect",
    "host",
    "keep-alive",
    "origin",
    "referer",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "user-agent",
    "via",
];

/// Returns true for a lowercased header name owned by the network layer.
#[must_use]
pub fn is_network_layer_header(name: &str) -> bool {
    NETWORK_LAYER_HEADERS.contains(&name) || name.starts_with("proxy-") || name.starts_with("sec-")
}

/// Checks that the headers named by `Vary` are equal between the query
/// request and the request that was cached.
///
/// Network-layer headers such as `Accept-Encoding` are skipped: a browser
/// sends them on every request, but they are not part of the request itself.
#[must_use]
pub fn vary_header_matches(
    response_headers: &HeaderMap,
    query_headers: &HeaderMap,
    cached_headers: &HeaderMap,
) -> bool {
    vary_header_names(response_headers).iter().all(|name| {
        if name == "*" {
            return false;
        }
        is_network_layer_header(name) || query_headers.get(name.as_str()) == cached_headers.get(name.as_str())
    })
}

/// Serializes headers into `name\r\nvalue\r\n` pairs.
#[must_use]
pub fn serialize_headers(headers: &HeaderMap) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Parses a header block produced by [`serialize_headers`].
///
/// # Errors
///
/// Returns [`Error::CorruptStore`] if the block is truncated or holds an
/// invalid header name or value.
pub fn deserialize_headers(block: &[u8]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < block.len() {
        if block[i] == b'\r' && block[i + 1] == b'\n' {
            pieces.push(&block[start..i]);
            start = i + 2;
            i += 2;
        } else {
            i += 1;
        }
    }
    if start != block.len() || pieces.len() % 2 != 0 {
        return Err(Error::CorruptStore("truncated header block".to_string()));
    }
    for pair in pieces.chunks(2) {
        let name = HeaderName::from_bytes(pair[0])
            .map_err(|e| Error::CorruptStore(format!("bad header name: {e}")))?;
        let value = HeaderValue::from_bytes(pair[1])
            .map_err(|e| Error::CorruptStore(format!("bad header value: {e}")))?;
        headers.append(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn entry(u: &str, response: CachedResponse) -> CacheEntry {
        CacheEntry::new(&CacheRequest::get(url(u)), response)
    }

    #[test]
    fn key_url_drops_fragment_keeps_query() {
        let req = CacheRequest::get(url("http://localhost/a.html?x=1#top"));
        assert_eq!(req.key_url().as_str(), "http://localhost/a.html?x=1");
    }

    #[test]
    fn entry_matches_same_url_ignoring_fragment() {
        let e = entry("http://localhost/index.html", CachedResponse::new(StatusCode::OK, "hi"));
        assert!(e.matches(&CacheRequest::get(url("http://localhost/index.html#section"))));
        assert!(!e.matches(&CacheRequest::get(url("http://localhost/index.html?v=2"))));
    }

    #[test]
    fn entry_never_matches_non_get() {
        let e = entry("http://localhost/api", CachedResponse::new(StatusCode::OK, ""));
        let mut post = CacheRequest::get(url("http://localhost/api"));
        post.method = Method::POST;
        assert!(!e.matches(&post));
    }

    #[test]
    fn vary_matches_equal_headers() {
        let response = CachedResponse::new(StatusCode::OK, "")
            .with_header(VARY, HeaderValue::from_static("accept-language"));
        let cached = CacheRequest::get(url("http://localhost/a"))
            .with_header(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        let e = CacheEntry::new(&cached, response);

        let same = CacheRequest::get(url("http://localhost/a"))
            .with_header(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        let other = CacheRequest::get(url("http://localhost/a"))
            .with_header(ACCEPT_LANGUAGE, HeaderValue::from_static("de"));
        assert!(e.matches(&same));
        assert!(!e.matches(&other));
    }

    #[test]
    fn vary_ignores_network_layer_headers() {
        let response = CachedResponse::new(StatusCode::OK, "")
            .with_header(VARY, HeaderValue::from_static("Accept-Encoding, User-Agent, Sec-Fetch-Mode"));
        let e = entry("http://localhost/a", response);

        let browser = CacheRequest::get(url("http://localhost/a"))
            .with_header(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"))
            .with_header(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"))
            .with_header(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("navigate"));
        assert!(e.matches(&browser));
        assert!(is_network_layer_header("proxy-authorization"));
        assert!(!is_network_layer_header("accept-language"));
    }

    #[test]
    fn vary_star_never_matches() {
        let response = CachedResponse::new(StatusCode::OK, "")
            .with_header(VARY, HeaderValue::from_static("*"));
        assert!(response.varies_on_everything());
        let e = entry("http://localhost/a", response);
        assert!(!e.matches(&CacheRequest::get(url("http://localhost/a"))));
    }

    #[test]
    fn vary_lists_are_split_and_trimmed() {
        let mut headers = HeaderMap::new();
        headers.append(VARY, HeaderValue::from_static("Accept-Encoding, User-Agent"));
        headers.append(VARY, HeaderValue::from_static("origin"));
        assert_eq!(
            vary_header_names(&headers),
            vec!["accept-encoding", "user-agent", "origin"]
        );
    }

    #[test]
    fn header_block_preserves_repeats_and_raw_bytes() {
        let mut headers = HeaderMap::new();
        headers.append(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.append("x-raw", HeaderValue::from_bytes(b"caf\xe9").unwrap());

        let block = serialize_headers(&headers);
        assert_eq!(deserialize_headers(&block).unwrap(), headers);
    }

    #[test]
    fn empty_header_block() {
        assert!(deserialize_headers(b"").unwrap().is_empty());
    }

    #[test]
    fn truncated_header_block_is_corrupt() {
        assert!(matches!(
            deserialize_headers(b"content-type\r\n"),
            Err(Error::CorruptStore(_))
        ));
        assert!(matches!(
            deserialize_headers(b"content-type\r\ntext"),
            Err(Error::CorruptStore(_))
        ));
    }
}
