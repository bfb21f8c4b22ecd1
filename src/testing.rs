//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{StatusCode, Url};

use crate::error::{Error, Result};
use crate::network::Network;
use crate::request::{CacheRequest, CachedResponse};

pub const SCOPE: &str = "http://127.0.0.1:8501/";

/// Resolves `path` against [`SCOPE`].
pub fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

/// A scripted network: known URLs answer with canned responses, anything
/// else fails like a refused connection.
#[derive(Default)]
pub struct MockNetwork {
    responses: Mutex<HashMap<Url, CachedResponse>>,
    calls: Mutex<Vec<Url>>,
    delay: Option<Duration>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every request after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serves `response` for `path`.
    pub fn serve(self, path: &str, response: CachedResponse) -> Self {
        self.responses.lock().unwrap().insert(url(path), response);
        self
    }

    /// Serves a `200 text/plain` body for `path`.
    pub fn serve_text(self, path: &str, body: &'static str) -> Self {
        let response = CachedResponse::new(StatusCode::OK, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        self.serve(path, response)
    }

    /// Replaces the response for `path` on a shared instance.
    pub fn replace(&self, path: &str, response: CachedResponse) {
        self.responses.lock().unwrap().insert(url(path), response);
    }

    /// Number of requests sent so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of requests sent to `path`.
    pub fn calls_to(&self, path: &str) -> usize {
        let target = url(path);
        self.calls.lock().unwrap().iter().filter(|u| **u == target).count()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let key = request.key_url();
        self.calls.lock().unwrap().push(key.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.responses.lock().unwrap().get(&key).cloned();
        response.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("no route to {key}"),
            ))
        })
    }
}
