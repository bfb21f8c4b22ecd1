//! Network abstraction for testability.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};

use crate::config::FetchConfig;
use crate::error::Result;
use crate::request::{CacheRequest, CachedResponse};

/// Abstraction over the network the shell falls back to.
#[async_trait]
pub trait Network: Send + Sync {
    /// Sends `request` and returns the complete response.
    ///
    /// A response with any status is a success; only transport failures are
    /// errors.
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse>;
}

/// Default network implementation backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestNetwork {
    client: reqwest::Client,
}

impl ReqwestNetwork {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a client configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(config.concurrent_fetches.max(1))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let mut headers = request.headers.clone();
        // The client owns these; forwarding them verbatim breaks framing.
        for name in [HOST, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING] {
            headers.remove(name);
        }

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        log::debug!("{} {} -> {status} ({} bytes)", request.method, request.url, body.len());

        Ok(CachedResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    #[test]
    fn reqwest_network_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReqwestNetwork>();
    }

    #[test]
    fn builds_from_default_config() {
        assert!(ReqwestNetwork::from_config(&FetchConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let network = ReqwestNetwork::from_config(&FetchConfig::default().with_timeout_secs(2)).unwrap();
        // Port 9 (discard) on loopback is closed on test machines.
        let request = CacheRequest::get(Url::parse("http://127.0.0.1:9/index.html").unwrap());
        assert!(network.fetch(&request).await.is_err());
    }
}
