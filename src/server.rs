//! HTTP front that turns incoming requests into fetch events.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONNECTION, HeaderName, TRANSFER_ENCODING};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use reqwest::Url;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::host::{HostHandle, WorkerHost};
use crate::network::Network;
use crate::request::CacheRequest;
use crate::shell::{Fetched, InstallProgress, OfflineShell};
use crate::storage::CacheStorage;

/// Path of the health endpoint. It is answered by the server itself and never
/// reaches the shell.
pub const HEALTH_PATH: &str = "/__shell/health";

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

struct AppState<N: Network, S: CacheStorage> {
    shell: Arc<OfflineShell<N, S>>,
    host: HostHandle,
    max_body_bytes: usize,
}

impl<N: Network, S: CacheStorage> Clone for AppState<N, S> {
    fn clone(&self) -> Self {
        Self {
            shell: Arc::clone(&self.shell),
            host: self.host.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    cache: String,
    state: &'static str,
    assets: usize,
    scope: String,
}

async fn health<N, S>(State(state): State<AppState<N, S>>) -> impl IntoResponse
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    axum::Json(HealthResponse {
        status: "ok",
        cache: state.shell.cache_name().to_string(),
        state: state.shell.state().as_str(),
        assets: state.shell.manifest().len(),
        scope: state.shell.manifest().scope().to_string(),
    })
}

async fn intercept<N, S>(State(state): State<AppState<N, S>>, request: Request) -> Response
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };
    let Some(url) = scope_url(state.shell.manifest().scope(), &parts.uri) else {
        return (StatusCode::BAD_REQUEST, "request path is outside the shell scope").into_response();
    };

    let request = CacheRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
    };
    match state.host.fetch(request).await {
        Ok(fetched) => http_response(fetched),
        Err(Error::HostClosed) => (StatusCode::SERVICE_UNAVAILABLE, Error::HostClosed.to_string()).into_response(),
        Err(e) => {
            log::warn!("Fetch failed: {e}");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Maps the path and query of `uri` onto `scope`.
fn scope_url(scope: &Url, uri: &Uri) -> Option<Url> {
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = scope.join(&format!("./{}", path.trim_start_matches('/'))).ok()?;
    (url.origin() == scope.origin()).then_some(url)
}

fn http_response(fetched: Fetched) -> Response {
    let stored = fetched.response;
    let mut headers = stored.headers;
    for name in [CONNECTION, TRANSFER_ENCODING, KEEP_ALIVE] {
        headers.remove(name);
    }
    let mut response = Response::new(Body::from(stored.body));
    *response.status_mut() = stored.status;
    *response.headers_mut() = headers;
    response
}

/// Builds the router for a running host.
pub fn router<N, S>(shell: Arc<OfflineShell<N, S>>, host: HostHandle, config: &ServerConfig) -> Router
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    let state = AppState {
        shell,
        host,
        max_body_bytes: config.max_body_bytes,
    };
    let app = Router::new()
        .route(HEALTH_PATH, get(health::<N, S>))
        .fallback(intercept::<N, S>)
        .with_state(state);

    if config.cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app.layer(cors)
    } else {
        app
    }
}

/// Binds the listener described by `config`.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    Ok(listener)
}

/// Runs the HTTP front until `shutdown` is cancelled.
///
/// The shell is resumed from its store when possible and installed through
/// the host otherwise. A failed install leaves the server answering in
/// passthrough mode.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<N, S>(
    listener: TcpListener,
    shell: Arc<OfflineShell<N, S>>,
    config: &ServerConfig,
    progress: Arc<dyn InstallProgress>,
    shutdown: CancellationToken,
) -> Result<()>
where
    N: Network + 'static,
    S: CacheStorage + 'static,
{
    let (host, host_task) = WorkerHost::spawn(Arc::clone(&shell), progress);

    let resumed = shell.resume().await.unwrap_or_else(|e| {
        log::warn!("Could not read existing cache: {e}");
        false
    });
    if !resumed {
        if let Err(e) = host.install().await {
            log::warn!("Install failed, serving in passthrough mode: {e}");
        }
    }

    let addr: SocketAddr = listener.local_addr()?;
    log::info!(
        "Serving {} on http://{addr} ({})",
        shell.manifest().scope(),
        shell.state().as_str()
    );

    let app = router(shell, host, config);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    host_task.abort();
    log::info!("Server stopped");
    Ok(())
}
