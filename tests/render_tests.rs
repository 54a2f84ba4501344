// Render trigger tests: JSON output, empty windows, read-only on the store

mod common;

use common::{dual_repo, full_snapshot};
use tempfile::TempDir;
use vicare_monitor::render::{self, JsonFileRenderer, SERIES_FILE};

#[tokio::test]
async fn render_writes_series_json() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    let now = 1_700_100_000;
    repo.append(&full_snapshot(now - 120, 40.0)).await.unwrap();
    repo.append(&full_snapshot(now - 60, 41.0)).await.unwrap();
    // Outside the two-day window.
    repo.append(&full_snapshot(now - 3 * 86_400, 39.0)).await.unwrap();

    let out = dir.path().join("out");
    let renderer = JsonFileRenderer::new(&out);
    let series = render::render(&repo, &renderer, 2, now).await.unwrap();
    assert_eq!(series.rows, 2);

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join(SERIES_FILE)).unwrap()).unwrap();
    assert_eq!(doc["window"]["until"], now);
    assert_eq!(doc["window"]["since"], now - 2 * 86_400);
    assert_eq!(doc["last_data_point"], now - 60);
    assert_eq!(doc["series"]["rows"], 2);
    assert_eq!(doc["series"]["points"][0]["variable"], "active");
}

#[tokio::test]
async fn render_empty_window_is_valid_output() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    let out = dir.path().join("out");
    let renderer = JsonFileRenderer::new(&out);

    let series = render::render(&repo, &renderer, 2, 1_700_000_000).await.unwrap();
    assert!(series.is_empty());
    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(renderer.output_path()).unwrap()).unwrap();
    assert!(doc["last_data_point"].is_null());
    assert_eq!(doc["series"]["points"], serde_json::json!([]));
}

#[tokio::test]
async fn render_twice_leaves_store_unchanged() {
    let dir = TempDir::new().unwrap();
    let repo = dual_repo(&dir).await;
    let now = 1_700_100_000;
    repo.append(&full_snapshot(now - 60, 41.0)).await.unwrap();
    let renderer = JsonFileRenderer::new(dir.path().join("out"));

    let first = render::render(&repo, &renderer, 2, now).await.unwrap();
    let second = render::render(&repo, &renderer, 2, now).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(repo.info().await.unwrap().heating_records, 1);
}
