//! Intercepting HTTP proxy: every request goes through the active worker.
//!
//! Admin endpoints live under `/__echonet/`; `/service-worker.js` serves the
//! browser worker for the current configuration.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::network::{Network, Request, Response, is_hop_by_hop};
use crate::worker::{
    CacheStrategy, CachingWorker, InstallProgress, NoProgress, Registration, ServiceWorker,
    WorkerId, WorkerState, service_worker_js,
};

/// Response header naming where the body came from.
pub const SOURCE_HEADER: &str = "x-echonet-source";

/// Largest request body forwarded to the origin.
const MAX_BODY: usize = 16 * 1024 * 1024;

/// Key for requests whose peer address is unknown.
const UNKNOWN_CLIENT: &str = "unknown";

struct Inner {
    registration: RwLock<Registration>,
    /// Config the next `install` uses.
    worker: RwLock<WorkerConfig>,
    /// Config each live worker was built from.
    installed: RwLock<HashMap<WorkerId, WorkerConfig>>,
    cache: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    progress: Arc<dyn InstallProgress>,
}

/// Shared proxy state: the registration plus what new workers are built from.
#[derive(Clone)]
pub struct ProxyState {
    inner: Arc<Inner>,
}

impl ProxyState {
    #[must_use]
    pub fn new(
        worker: WorkerConfig,
        cache: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        client_idle_timeout: Duration,
    ) -> Self {
        Self::with_progress(worker, cache, network, client_idle_timeout, Arc::new(NoProgress))
    }

    /// Like [`ProxyState::new`], reporting precache progress to `progress`.
    #[must_use]
    pub fn with_progress(
        worker: WorkerConfig,
        cache: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        client_idle_timeout: Duration,
        progress: Arc<dyn InstallProgress>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registration: RwLock::new(
                    Registration::new().with_client_idle_timeout(client_idle_timeout),
                ),
                worker: RwLock::new(worker),
                installed: RwLock::new(HashMap::new()),
                cache,
                network,
                progress,
            }),
        }
    }

    /// Installs a worker from the current configuration.
    ///
    /// # Errors
    ///
    /// Returns the install error; the active worker is left in place.
    pub async fn install(&self) -> Result<WorkerId> {
        let config = self.inner.worker.read().await.clone();
        self.install_with(config).await
    }

    /// Installs a worker from `config`, which becomes current once the
    /// install succeeds.
    ///
    /// The install runs without holding the registration lock, so requests
    /// keep flowing through the current worker meanwhile.
    ///
    /// # Errors
    ///
    /// Returns the install error; the active worker is left in place.
    pub async fn install_with(&self, config: WorkerConfig) -> Result<WorkerId> {
        let hooks = CachingWorker::new(
            config.clone(),
            self.inner.cache.clone(),
            self.inner.network.clone(),
        )
        .with_progress(self.inner.progress.clone());

        let worker = ServiceWorker::install(Arc::new(hooks)).await?;
        let id = worker.id();
        *self.inner.worker.write().await = config.clone();
        self.inner.installed.write().await.insert(id, config);

        let live: Vec<WorkerId> = {
            let mut reg = self.inner.registration.write().await;
            reg.accept(worker).await;
            reg.active()
                .into_iter()
                .chain(reg.waiting())
                .map(ServiceWorker::id)
                .collect()
        };
        self.inner
            .installed
            .write()
            .await
            .retain(|id, _| live.contains(id));
        Ok(id)
    }

    /// Activates the waiting worker without waiting for pages to close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no worker is waiting.
    pub async fn skip_waiting(&self) -> Result<WorkerId> {
        self.inner.registration.write().await.skip_waiting().await
    }

    /// Snapshot of the registration, cache and clients.
    ///
    /// `strategy`, `cache_name` and `entries` describe what is serving
    /// requests: the active worker, or the configured worker if none is.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache store cannot be read.
    pub async fn status(&self) -> Result<ProxyStatus> {
        let fallback = self.inner.worker.read().await.clone();
        let installed = self.inner.installed.read().await.clone();
        let config_of = |worker: &ServiceWorker| {
            installed
                .get(&worker.id())
                .cloned()
                .unwrap_or_else(|| fallback.clone())
        };

        let (active, waiting, clients) = {
            let reg = self.inner.registration.read().await;
            (
                reg.active().map(|w| WorkerSummary::of(w, config_of(w))),
                reg.waiting().map(|w| WorkerSummary::of(w, config_of(w))),
                reg.clients().len(),
            )
        };

        let (strategy, cache_name) = active.as_ref().map_or_else(
            || (fallback.strategy, fallback.cache_name.clone()),
            |a| (a.strategy, a.cache_name.clone()),
        );
        let entries = self.inner.cache.keys(&cache_name).await?.len();
        Ok(ProxyStatus {
            active,
            waiting,
            strategy,
            cache_name,
            entries,
            clients,
        })
    }

    /// Serves `request` for `client`: through the controlling worker, or
    /// straight from the network for uncontrolled clients.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] or a transport error.
    pub async fn handle(&self, client: &str, request: &Request) -> Result<Response> {
        let hooks = self
            .inner
            .registration
            .write()
            .await
            .handler_for(client)
            .await;
        match hooks {
            Some(hooks) => hooks.fetch(request).await,
            None => {
                log::debug!("{client} is uncontrolled, passing {} through", request.key);
                self.inner.network.fetch(request).await
            }
        }
    }
}

/// One worker in a [`ProxyStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: String,
    pub state: WorkerState,
    pub label: String,
    pub since: DateTime<Utc>,
    pub strategy: CacheStrategy,
    pub cache_name: String,
}

impl WorkerSummary {
    fn of(worker: &ServiceWorker, config: WorkerConfig) -> Self {
        Self {
            id: worker.id().to_string(),
            state: worker.state(),
            label: worker.label(),
            since: worker.state_changed_at(),
            strategy: config.strategy,
            cache_name: config.cache_name,
        }
    }
}

/// Body of `GET /__echonet/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub active: Option<WorkerSummary>,
    pub waiting: Option<WorkerSummary>,
    pub strategy: CacheStrategy,
    pub cache_name: String,
    /// Entries in the serving worker's cache namespace.
    pub entries: usize,
    pub clients: usize,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateParams {
    strategy: Option<String>,
    cache_name: Option<String>,
}

#[derive(Serialize)]
struct WorkerResponse {
    worker: String,
}

/// Maps crate errors onto HTTP statuses.
enum ApiError {
    BadRequest(String),
    Failed(Error),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Failed(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> HttpResponse {
        let err = match self {
            Self::BadRequest(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
            Self::Failed(err) => err,
        };
        let status = match &err {
            Error::ResourceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::CacheFill { .. } | Error::Http(_) | Error::Io(_) | Error::Timeout => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, err.to_string()).into_response()
    }
}

async fn status(State(state): State<ProxyState>) -> std::result::Result<axum::Json<ProxyStatus>, ApiError> {
    Ok(axum::Json(state.status().await?))
}

async fn update(
    State(state): State<ProxyState>,
    Query(params): Query<UpdateParams>,
) -> std::result::Result<axum::Json<WorkerResponse>, ApiError> {
    let mut config = state.inner.worker.read().await.clone();
    if let Some(strategy) = params.strategy {
        config.strategy = strategy
            .parse()
            .map_err(|e: Error| ApiError::BadRequest(e.to_string()))?;
    }
    if let Some(name) = params.cache_name {
        config.cache_name = name;
    }
    let id = state.install_with(config).await?;
    Ok(axum::Json(WorkerResponse {
        worker: id.to_string(),
    }))
}

async fn skip_waiting(
    State(state): State<ProxyState>,
) -> std::result::Result<axum::Json<WorkerResponse>, ApiError> {
    let id = state.skip_waiting().await?;
    Ok(axum::Json(WorkerResponse {
        worker: id.to_string(),
    }))
}

async fn worker_script(State(state): State<ProxyState>) -> impl IntoResponse {
    let js = service_worker_js(&*state.inner.worker.read().await);
    ([(header::CONTENT_TYPE, "application/javascript")], js)
}

async fn intercept(State(state): State<ProxyState>, req: axum::extract::Request) -> HttpResponse {
    let (parts, body) = req.into_parts();
    let client = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |ci| ci.0.ip().to_string());

    let key = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);
    let mut request = Request::new(parts.method.as_str(), key);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str()
            && !is_hop_by_hop(name.as_str())
        {
            request = request.with_header(name.as_str(), value);
        }
    }
    match axum::body::to_bytes(body, MAX_BODY).await {
        Ok(bytes) => request.body = bytes,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("Unreadable body: {e}")).into_response(),
    }

    match state.handle(&client, &request).await {
        Ok(resp) => into_http(resp),
        Err(e) => {
            log::warn!("{} {} failed: {e}", request.method, request.key);
            ApiError::Failed(e).into_response()
        }
    }
}

fn into_http(resp: Response) -> HttpResponse {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &resp.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
        .header(SOURCE_HEADER, resp.served.as_str())
        .body(Body::from(resp.body))
        .unwrap_or_else(|e| {
            log::warn!("Dropping malformed upstream response: {e}");
            (StatusCode::BAD_GATEWAY, "Malformed upstream response").into_response()
        })
}

/// Builds the proxy router.
pub fn router(state: ProxyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/__echonet/status", get(status))
        .route("/__echonet/update", post(update))
        .route("/__echonet/skip-waiting", post(skip_waiting))
        .route("/service-worker.js", get(worker_script))
        .fallback(intercept)
        .layer(cors)
        .with_state(state)
}

/// Serves the proxy on `host:port` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn serve(
    host: &str,
    port: u16,
    state: ProxyState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::InvalidState(format!("invalid listen address {host}:{port}: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Proxy listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    log::info!("Proxy stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => log::info!("Received SIGINT"),
                    _ = sigterm.recv() => log::info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {e}");
                tokio::signal::ctrl_c().await.ok();
                log::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Received SIGINT");
    }
}
