// Dump the newest raw device payloads and the latest snapshot as JSON.
//
// Usage: cargo run --example dump_history -- [DB_PATH] [LIMIT]
//   DB_PATH  default: ./data/heating.db
//   LIMIT    default: 5

use std::env;
use vicare_monitor::history_repo::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let path = args.get(1).map(String::as_str).unwrap_or("./data/heating.db");
    let limit: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5);

    let store = SqliteStore::connect(path, 1).await?;
    store.init().await?;
    let raw = store.recent_raw(limit).await?;
    let latest = store.latest().await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "raw": raw,
            "latest": latest,
        }))?
    );
    Ok(())
}
