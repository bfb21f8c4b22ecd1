//! The lifecycle host: delivers `install` and `fetch` events to a handler.
//!
//! Every event carries a completion channel. An install event keeps the
//! loop busy until its handler settles, so fetches submitted behind it are
//! delivered to an installed shell. Fetch events run as their own tasks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::network::Network;
use crate::request::CacheRequest;
use crate::shell::{Fetched, InstallProgress, OfflineShell};
use crate::stats::InstallReport;
use crate::storage::CacheStorage;

/// The two lifecycle events a handler reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Populate the cache.
    Install,
    /// Answer an intercepted request.
    Fetch,
}

impl EventKind {
    /// The event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Fetch => "fetch",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handlers registered with a [`WorkerHost`], one per lifecycle event.
#[async_trait]
pub trait LifecycleHandler: Send + Sync + 'static {
    /// Handles the install event.
    async fn install(&self, progress: &Arc<dyn InstallProgress>) -> Result<InstallReport>;

    /// Handles a fetch event.
    async fn fetch(&self, request: CacheRequest) -> Result<Fetched>;
}

#[async_trait]
impl<N, S> LifecycleHandler for OfflineShell<N, S>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    async fn install(&self, progress: &Arc<dyn InstallProgress>) -> Result<InstallReport> {
        Self::install(self, progress).await
    }

    async fn fetch(&self, request: CacheRequest) -> Result<Fetched> {
        Self::fetch(self, &request).await
    }
}

/// An event in flight, holding the channel its result is sent back on.
pub enum LifecycleEvent {
    /// Install, completed through `done`.
    Install {
        /// Receives the install outcome.
        done: oneshot::Sender<Result<InstallReport>>,
    },
    /// Fetch, answered through `respond`.
    Fetch {
        /// The intercepted request.
        request: CacheRequest,
        /// Receives exactly one response or error.
        respond: oneshot::Sender<Result<Fetched>>,
    },
}

impl LifecycleEvent {
    /// Which event this is.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Install { .. } => EventKind::Install,
            Self::Fetch { .. } => EventKind::Fetch,
        }
    }
}

/// Submits events to a running [`WorkerHost`].
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl HostHandle {
    /// Dispatches an install event and waits until it settles.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or [`Error::HostClosed`] if the host has
    /// stopped.
    pub async fn install(&self) -> Result<InstallReport> {
        let (done, rx) = oneshot::channel();
        self.submit(LifecycleEvent::Install { done })?;
        rx.await.map_err(|_| Error::HostClosed)?
    }

    /// Dispatches a fetch event and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or [`Error::HostClosed`] if the host has
    /// stopped.
    pub async fn fetch(&self, request: CacheRequest) -> Result<Fetched> {
        let (respond, rx) = oneshot::channel();
        self.submit(LifecycleEvent::Fetch { request, respond })?;
        rx.await.map_err(|_| Error::HostClosed)?
    }

    /// Returns true once the host loop has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn submit(&self, event: LifecycleEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::HostClosed)
    }
}

/// Runs the event loop for one handler.
pub struct WorkerHost<H: LifecycleHandler> {
    handler: Arc<H>,
    progress: Arc<dyn InstallProgress>,
    rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl<H: LifecycleHandler> WorkerHost<H> {
    /// Starts the event loop on the current runtime.
    ///
    /// The loop exits once every [`HostHandle`] has been dropped.
    pub fn spawn(handler: Arc<H>, progress: Arc<dyn InstallProgress>) -> (HostHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Self { handler, progress, rx };
        (HostHandle { tx }, tokio::spawn(host.run()))
    }

    async fn run(mut self) {
        log::debug!("Lifecycle host started");
        while let Some(event) = self.rx.recv().await {
            log::trace!("Delivering {} event", event.kind());
            match event {
                LifecycleEvent::Install { done } => {
                    let result = self.handler.install(&self.progress).await;
                    if done.send(result).is_err() {
                        log::warn!("Install completed after its submitter went away");
                    }
                }
                LifecycleEvent::Fetch { request, respond } => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        let result = handler.fetch(request).await;
                        let _ = respond.send(result);
                    });
                }
            }
        }
        log::debug!("Lifecycle host stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::manifest::AssetManifest;
    use crate::shell::{FetchSource, NoProgress};
    use crate::storage::MemoryStorage;
    use crate::testing::{MockNetwork, SCOPE, url};

    type TestShell = OfflineShell<MockNetwork, MemoryStorage>;

    fn shell(network: MockNetwork) -> Arc<TestShell> {
        let manifest = AssetManifest::new(SCOPE, &["./", "./index.html"]).unwrap();
        Arc::new(OfflineShell::with_parts("v1", manifest, network, MemoryStorage::new()).unwrap())
    }

    fn network() -> MockNetwork {
        MockNetwork::new()
            .serve_text("./", "root")
            .serve_text("./index.html", "<html></html>")
    }

    #[test]
    fn event_names() {
        assert_eq!(EventKind::Install.to_string(), "install");
        assert_eq!(EventKind::Fetch.as_str(), "fetch");
    }

    #[tokio::test]
    async fn install_then_fetch_from_cache() {
        let shell = shell(network());
        let (handle, _join) = WorkerHost::spawn(Arc::clone(&shell), Arc::new(NoProgress));

        let report = handle.install().await.unwrap();
        assert_eq!(report.assets_cached, 2);

        let fetched = handle.fetch(CacheRequest::get(url("./index.html"))).await.unwrap();
        assert_eq!(fetched.source, FetchSource::Cache);
        assert_eq!(shell.network().call_count(), 2);
    }

    #[tokio::test]
    async fn fetch_queued_behind_install_sees_installed_shell() {
        let shell = shell(network().with_delay(Duration::from_millis(20)));
        let (handle, _join) = WorkerHost::spawn(Arc::clone(&shell), Arc::new(NoProgress));

        let (installed, fetched) = tokio::join!(
            handle.install(),
            handle.fetch(CacheRequest::get(url("./")))
        );

        installed.unwrap();
        assert_eq!(fetched.unwrap().source, FetchSource::Cache);
    }

    #[tokio::test]
    async fn failed_install_is_reported_and_fetches_pass_through() {
        let shell = shell(MockNetwork::new().serve_text("./", "root"));
        let (handle, _join) = WorkerHost::spawn(Arc::clone(&shell), Arc::new(NoProgress));

        assert!(handle.install().await.is_err());
        let fetched = handle.fetch(CacheRequest::get(url("./"))).await.unwrap();
        assert_eq!(fetched.source, FetchSource::Passthrough);
    }

    #[tokio::test]
    async fn every_fetch_gets_one_answer() {
        let shell = shell(network());
        let (handle, _join) = WorkerHost::spawn(Arc::clone(&shell), Arc::new(NoProgress));
        handle.install().await.unwrap();

        let requests = ["./", "./index.html", "./missing.css"];
        let results = futures::future::join_all(
            requests.iter().map(|path| handle.fetch(CacheRequest::get(url(path)))),
        )
        .await;

        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn stopped_host_reports_closed() {
        let shell = shell(network());
        let (handle, join) = WorkerHost::spawn(shell, Arc::new(NoProgress));
        join.abort();
        let _ = join.await;

        assert!(handle.is_closed());
        assert!(matches!(handle.install().await, Err(Error::HostClosed)));
        assert!(matches!(
            handle.fetch(CacheRequest::get(url("./"))).await,
            Err(Error::HostClosed)
        ));
    }
}
