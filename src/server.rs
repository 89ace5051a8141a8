use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    api::ApiClient,
    discovery::{DiscoveryCoordinator, Phase},
    netdetect::SubnetScanner,
    probe::HostProbe,
    select::{self, SelectError},
    settings::{self, SettingsStore},
    sink::ResultSink,
    types::{DiscoveryState, ServerCandidate},
};

/// What the web UI knows about one discovery run, fed through [`WebSink`].
#[derive(Debug, Default)]
struct DiscoveryView {
    state: DiscoveryState,
    status: String,
}

#[derive(Clone)]
struct WebSink {
    view: Arc<Mutex<DiscoveryView>>,
}

impl WebSink {
    fn with_view<R>(&self, f: impl FnOnce(&mut DiscoveryView) -> R) -> R {
        f(&mut self.view.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ResultSink for WebSink {
    fn on_progress(&self, status: &str) {
        self.with_view(|v| {
            v.state.scanned_count += 1;
            v.status = status.to_string();
        });
    }

    fn on_server_found(&self, candidate: &ServerCandidate) {
        self.with_view(|v| v.state.found.push(candidate.clone()));
    }

    fn on_finished(&self) {
        self.with_view(|v| v.state.in_flight = false);
    }
}

pub struct AppState<P, C> {
    inner: Arc<RwLock<ServerState>>, // view of the latest run
    coordinator: Arc<DiscoveryCoordinator<P>>,
    api: Arc<C>,
    settings: Arc<dyn SettingsStore>,
}

impl<P, C> Clone for AppState<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            coordinator: self.coordinator.clone(),
            api: self.api.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    generation: u64,
    view: Arc<Mutex<DiscoveryView>>,
}

impl<P: HostProbe, C: ApiClient> AppState<P, C> {
    pub fn new(
        coordinator: Arc<DiscoveryCoordinator<P>>,
        api: Arc<C>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ServerState::default())),
            coordinator,
            api,
            settings,
        }
    }

    pub fn coordinator(&self) -> &Arc<DiscoveryCoordinator<P>> {
        &self.coordinator
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub state: String, // "idle" | "running" | "done"
    pub generation: u64,
    pub scanned: u64,
    pub total: u64,
    pub found: u64,
    pub status: String,
    pub host: String,
}

#[derive(Debug, Deserialize)]
pub struct HostRequest {
    pub host: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostResponse {
    pub host: String,
    pub version: String,
    pub legacy: bool,
}

pub fn router<P: HostProbe, C: ApiClient>(state: AppState<P, C>) -> Router {
    Router::new()
        .route("/status", get(get_status::<P, C>))
        .route("/discover", post(post_discover::<P, C>))
        .route("/cancel", post(post_cancel::<P, C>))
        .route("/servers", get(get_servers::<P, C>))
        .route("/host", post(post_host::<P, C>))
        .with_state(state)
}

pub async fn spawn_server<P: HostProbe, C: ApiClient>(bind: &str, state: AppState<P, C>) -> Result<()> {
    let static_svc = ServeDir::new("ui").append_index_html_on_directories(true);

    let app = Router::new()
        .nest("/api", router(state))
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http());

    info!(%bind, "serving UI");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn status_of<P: HostProbe, C: ApiClient>(app: &AppState<P, C>) -> Status {
    let s = app.inner.read().await;
    // The coordinator holds its slot lock while feeding the view, so the
    // slot must never be taken while the view is locked.
    let state = match app.coordinator.phase() {
        Phase::Idle => "idle",
        Phase::Running => "running",
        Phase::Finished => "done",
    };
    let view = s.view.lock().unwrap_or_else(PoisonError::into_inner);
    Status {
        state: state.into(),
        generation: s.generation,
        scanned: view.state.scanned_count,
        total: view.state.total_count,
        found: view.state.found.len() as u64,
        status: view.status.clone(),
        host: app.settings.host(),
    }
}

async fn get_status<P: HostProbe, C: ApiClient>(State(app): State<AppState<P, C>>) -> impl IntoResponse {
    (StatusCode::OK, Json(status_of(&app).await))
}

async fn get_servers<P: HostProbe, C: ApiClient>(State(app): State<AppState<P, C>>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let found = s
        .view
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .state
        .found
        .clone();
    (StatusCode::OK, Json(found))
}

async fn post_discover<P: HostProbe, C: ApiClient>(State(app): State<AppState<P, C>>) -> impl IntoResponse {
    let saved = settings::saved_hosts(app.settings.as_ref());
    let scanner = match SubnetScanner::detect(app.coordinator.config(), saved) {
        Ok(s) => s,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("{e:#}")).into_response(),
    };

    let view = Arc::new(Mutex::new(DiscoveryView {
        state: DiscoveryState {
            in_flight: true,
            ..Default::default()
        },
        status: String::new(),
    }));
    let sink = Arc::new(WebSink { view: view.clone() });

    {
        let mut s = app.inner.write().await;
        let run = app.coordinator.find(&scanner, sink);
        view.lock().unwrap_or_else(PoisonError::into_inner).state.total_count = run.total;
        s.generation = run.generation;
        s.view = view;
    }

    (StatusCode::ACCEPTED, Json(status_of(&app).await)).into_response()
}

async fn post_cancel<P: HostProbe, C: ApiClient>(State(app): State<AppState<P, C>>) -> impl IntoResponse {
    app.coordinator.cancel();
    (StatusCode::OK, Json(status_of(&app).await))
}

async fn post_host<P: HostProbe, C: ApiClient>(
    State(app): State<AppState<P, C>>,
    Json(req): Json<HostRequest>,
) -> impl IntoResponse {
    match select::commit_host(&req.host, app.settings.as_ref(), app.api.as_ref()).await {
        Ok(sel) => (
            StatusCode::OK,
            Json(HostResponse {
                host: sel.host.to_string(),
                version: sel.version,
                legacy: sel.legacy,
            }),
        )
            .into_response(),
        Err(e) => {
            let code = match &e {
                SelectError::InvalidHost(_) => StatusCode::BAD_REQUEST,
                SelectError::UnsupportedServer { .. } => StatusCode::CONFLICT,
                SelectError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
                SelectError::Settings(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, e.to_string()).into_response()
        }
    }
}
