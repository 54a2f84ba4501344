use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use vicare_monitor::*;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[derive(Parser)]
#[command(name = "vicare-monitor", version, about = "Heating appliance telemetry collector")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collector and HTTP server (default).
    Serve,
    /// Fold a flat CSV log into the SQLite store.
    Import {
        #[arg(long = "csv")]
        csv: PathBuf,
        #[arg(long = "db")]
        db: Option<String>,
    },
    /// Print record counts and covered time range.
    Info {
        #[arg(long = "db")]
        db: Option<String>,
    },
    /// Write every stored snapshot to a CSV file with a header row.
    Export {
        #[arg(long = "output")]
        output: PathBuf,
        #[arg(long = "db")]
        db: Option<String>,
    },
    /// Render the chart series once and exit.
    Render {
        #[arg(long = "days")]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config::AppConfig::load()?).await,
        Commands::Import { csv, db } => {
            let repo = open_primary(db).await?;
            let report = repo.import_batch(&csv).await?;
            println!(
                "total={} imported={} malformed={}",
                report.total, report.imported, report.malformed
            );
            Ok(())
        }
        Commands::Info { db } => {
            let repo = open_primary(db).await?;
            let info = repo.info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Commands::Export { output, db } => {
            let repo = open_primary(db).await?;
            let n = repo.export_csv(&output).await?;
            println!("exported {} records to {}", n, output.display());
            Ok(())
        }
        Commands::Render { days } => {
            let app_config = config::AppConfig::load()?;
            let repo = open_repo(&app_config).await?;
            let renderer = json_renderer(&app_config)
                .context("render.output_dir must be set to render from the command line")?;
            let days = days.unwrap_or(app_config.render.window_days);
            let series = render::render(
                &repo,
                renderer.as_ref(),
                days,
                chrono::Utc::now().timestamp(),
            )
            .await?;
            println!("rendered {} rows, {} points", series.rows, series.points.len());
            Ok(())
        }
    }
}

/// SQLite only; `--db` wins over the configured path.
async fn open_primary(db: Option<String>) -> Result<history_repo::HistoryRepo> {
    let (path, max_pool_size) = match db {
        Some(path) => (path, 1),
        None => {
            let c = config::AppConfig::load()?;
            (c.database.path, c.database.max_pool_size)
        }
    };
    let repo = history_repo::HistoryRepo::open(&path, max_pool_size, None)
        .await
        .with_context(|| format!("opening {path}"))?;
    Ok(repo)
}

async fn open_repo(app_config: &config::AppConfig) -> Result<history_repo::HistoryRepo> {
    let repo = history_repo::HistoryRepo::open(
        &app_config.database.path,
        app_config.database.max_pool_size,
        app_config.database.flat_file.as_deref(),
    )
    .await?;
    Ok(repo)
}

fn json_renderer(app_config: &config::AppConfig) -> Option<Arc<dyn render::Renderer>> {
    let dir = app_config.render.output_dir.as_ref()?;
    Some(Arc::new(render::JsonFileRenderer::new(dir.clone())))
}

async fn serve(app_config: config::AppConfig) -> Result<()> {
    let history_repo = Arc::new(open_repo(&app_config).await?);
    let renderer = json_renderer(&app_config);
    let stats = Arc::new(worker::CollectorStats::default());
    let (state_tx, state_rx) = worker::state_channel();
    let cancel = CancellationToken::new();

    let worker_handle = if app_config.collector.enabled {
        let reader = device_repo::CommandReader::new(
            &app_config.device.command,
            app_config.device.env.clone(),
            app_config.device.timeout(),
        )
        .context("device.command must name a program")?;
        Some(worker::spawn(
            worker::WorkerDeps {
                reader: Arc::new(reader),
                history_repo: history_repo.clone(),
                renderer: renderer.clone(),
                stats: stats.clone(),
                state_tx,
                cancel: cancel.clone(),
            },
            worker::WorkerConfig {
                interval: app_config.collector.interval(),
                stats_log_interval: std::time::Duration::from_secs(
                    app_config.collector.stats_log_interval_secs,
                ),
                render_every_cycles: app_config.render.every_cycles,
                window_days: app_config.render.window_days,
            },
        ))
    } else {
        tracing::info!("collector disabled; serving stored data only");
        if let Some(renderer) = &renderer
            && let Err(e) = render::render(
                &history_repo,
                renderer.as_ref(),
                app_config.render.window_days,
                chrono::Utc::now().timestamp(),
            )
            .await
        {
            tracing::warn!(error = %e, "startup render failed");
        }
        None
    };

    let app = routes::app(history_repo, state_rx, stats, app_config.clone());
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let shutdown = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }
    cancel.cancel();
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
