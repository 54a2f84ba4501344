// HTTP routes: health, version, chart series, latest reading

mod http;

use axum::{Router, routing::get};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::history_repo::HistoryRepo;
use crate::worker::{CollectorState, CollectorStats};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) history_repo: Arc<HistoryRepo>,
    pub(crate) collector_state: watch::Receiver<CollectorState>,
    pub(crate) collector_stats: Arc<CollectorStats>,
    pub(crate) config: AppConfig,
}

pub fn app(
    history_repo: Arc<HistoryRepo>,
    collector_state: watch::Receiver<CollectorState>,
    collector_stats: Arc<CollectorStats>,
    config: AppConfig,
) -> Router {
    let state = AppState {
        history_repo,
        collector_state,
        collector_stats,
        config,
    };
    Router::new()
        .route("/", get(|| async { "vicare-monitor: heating telemetry collector" })) // GET /
        .route("/health", get(http::health_handler)) // GET /health
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/series", get(http::series_handler)) // GET /api/series?days=N
        .route("/api/latest", get(http::latest_handler)) // GET /api/latest
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
