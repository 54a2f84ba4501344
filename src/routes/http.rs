// GET handlers: health, version, api/series, api/latest

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::history_repo::sqlite::format_datetime;
use crate::models::{Snapshot, Window};
use crate::render::{self, RenderedSeries};
use crate::version::{NAME, VERSION, storage_versions};

/// Longest lookback a client may ask for.
const MAX_WINDOW_DAYS: u32 = 366;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// GET /health: liveness plus collector state and counters.
pub(super) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let collector = *state.collector_state.borrow();
    Json(serde_json::json!({
        "status": "ok",
        "collector_enabled": state.config.collector.enabled,
        "collector": collector,
        "stats": state.collector_stats.view(),
    }))
}

/// GET /version: service name, version, and the storage layouts this build writes.
pub(super) async fn version_handler() -> impl IntoResponse {
    let (flat_schema, sqlite_schema) = storage_versions();
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
        "flat_schema": flat_schema,
        "sqlite_schema": sqlite_schema,
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct SeriesParams {
    days: Option<u32>,
}

/// GET /api/series?days=N: chart series for the last N days (default from config).
pub(super) async fn series_handler(
    State(state): State<AppState>,
    Query(params): Query<SeriesParams>,
) -> Response {
    let days = params.days.unwrap_or(state.config.render.window_days);
    if days == 0 || days > MAX_WINDOW_DAYS {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("days must be between 1 and {MAX_WINDOW_DAYS}, got {days}"),
        );
    }
    let now = chrono::Utc::now().timestamp();
    let window = Window::last_days(now, days);
    match render::build_window(&state.history_repo, window).await {
        Ok(series) => Json(RenderedSeries {
            generated_at: now,
            window,
            last_data_point: series.last_timestamp(),
            series: &series,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, days, "series request failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[derive(Serialize)]
struct LatestReading {
    /// Local wall-clock time of `snapshot.timestamp`.
    datetime: String,
    #[serde(flatten)]
    snapshot: Snapshot,
}

/// GET /api/latest: most recent stored snapshot; 404 while the store is empty.
pub(super) async fn latest_handler(State(state): State<AppState>) -> Response {
    match state.history_repo.latest().await {
        Ok(Some(snapshot)) => Json(LatestReading {
            datetime: format_datetime(snapshot.timestamp),
            snapshot,
        })
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no snapshots stored yet"),
        Err(e) => {
            tracing::warn!(error = %e, kind = e.kind(), "latest request failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}
