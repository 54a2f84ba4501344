// Render trigger: query a window, build the series, hand it to a renderer.
// Read-only on the store; calling it twice for the same window and data is a no-op
// apart from rewriting identical output.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::instrument;

use crate::history_repo::HistoryRepo;
use crate::models::{Series, Window};
use crate::series;

/// Presentation sink for a built series (image, HTML, JSON, ...).
pub trait Renderer: Send + Sync {
    fn render(&self, window: Window, series: &Series) -> anyhow::Result<()>;
}

/// Document written by [`JsonFileRenderer`] and served by the HTTP API.
#[derive(Debug, Serialize)]
pub struct RenderedSeries<'a> {
    pub generated_at: i64,
    pub window: Window,
    pub last_data_point: Option<i64>,
    pub series: &'a Series,
}

pub const SERIES_FILE: &str = "series.json";

/// Writes `series.json` into a directory; readers never see a half-written file.
pub struct JsonFileRenderer {
    output_dir: PathBuf,
}

impl JsonFileRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(SERIES_FILE)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_data()?;
    }
    std::fs::rename(&tmp, path)
}

impl Renderer for JsonFileRenderer {
    fn render(&self, window: Window, series: &Series) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        let doc = RenderedSeries {
            generated_at: chrono::Utc::now().timestamp(),
            window,
            last_data_point: series.last_timestamp(),
            series,
        };
        write_atomic(&self.output_path(), &serde_json::to_vec(&doc)?)?;
        Ok(())
    }
}

/// Series for `window`. An empty window or empty store yields an empty series.
pub async fn build_window(repo: &HistoryRepo, window: Window) -> anyhow::Result<Series> {
    let records = repo.query(window.since, window.until).await?;
    Ok(series::build(&records))
}

/// Render the `window_days` days ending at `now`.
#[instrument(skip(repo, renderer), fields(operation = "render"))]
pub async fn render(
    repo: &HistoryRepo,
    renderer: &dyn Renderer,
    window_days: u32,
    now: i64,
) -> anyhow::Result<Series> {
    let window = Window::last_days(now, window_days);
    let series = build_window(repo, window).await?;
    if series.is_empty() {
        tracing::info!(window_days, "no chartable data in window");
    }
    renderer.render(window, &series)?;
    tracing::debug!(rows = series.rows, points = series.points.len(), "series rendered");
    Ok(series)
}
