// Collection loop: poll the boiler on a fixed interval, persist, trigger renders.
// Strictly sequential: a cycle's poll and write finish before the next tick is awaited.
// Cancellation is observed only between cycles, so an in-flight write is never torn.
// A failed cycle is logged and counted; nothing short of cancellation ends the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::device_repo::DeviceReader;
use crate::history_repo::HistoryRepo;
use crate::render::{self, Renderer};

/// Lifecycle as observed from outside (health endpoint, tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorState {
    Stopped,
    Running,
    Polling,
    Writing,
    Idle,
    Stopping,
}

pub fn state_channel() -> (watch::Sender<CollectorState>, watch::Receiver<CollectorState>) {
    watch::channel(CollectorState::Stopped)
}

/// Monotonic counters, shared with whoever wants to report them.
#[derive(Debug, Default)]
pub struct CollectorStats {
    cycles: AtomicU64,
    device_errors: AtomicU64,
    storage_errors: AtomicU64,
    snapshots_saved: AtomicU64,
    renders_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectorStatsView {
    pub cycles: u64,
    pub device_errors: u64,
    pub storage_errors: u64,
    pub snapshots_saved: u64,
    pub renders_failed: u64,
}

impl CollectorStats {
    pub fn view(&self) -> CollectorStatsView {
        CollectorStatsView {
            cycles: self.cycles.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            snapshots_saved: self.snapshots_saved.load(Ordering::Relaxed),
            renders_failed: self.renders_failed.load(Ordering::Relaxed),
        }
    }
}

/// Reader, store, optional renderer, and the handles used to observe and stop the loop.
pub struct WorkerDeps<R> {
    pub reader: Arc<R>,
    pub history_repo: Arc<HistoryRepo>,
    pub renderer: Option<Arc<dyn Renderer>>,
    pub stats: Arc<CollectorStats>,
    pub state_tx: watch::Sender<CollectorState>,
    pub cancel: CancellationToken,
}

/// Loop timing. `interval` is measured between cycle starts.
pub struct WorkerConfig {
    pub interval: Duration,
    /// How often to log collector stats at INFO.
    pub stats_log_interval: Duration,
    /// Render after this many saved snapshots; 0 disables timer-driven rendering.
    pub render_every_cycles: u64,
    pub window_days: u32,
}

pub fn spawn<R>(deps: WorkerDeps<R>, config: WorkerConfig) -> tokio::task::JoinHandle<()>
where
    R: DeviceReader + 'static,
{
    tokio::spawn(run(deps, config))
}

/// Runs until `deps.cancel` fires. Returns after the state has reached `Stopped`.
#[instrument(name = "collector", level = "debug", skip_all, fields(interval_secs = config.interval.as_secs()))]
pub async fn run<R: DeviceReader>(deps: WorkerDeps<R>, config: WorkerConfig) {
    let WorkerDeps {
        reader,
        history_repo,
        renderer,
        stats,
        state_tx,
        cancel,
    } = deps;

    let mut tick = interval(config.interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stats_log_tick = interval(config.stats_log_interval);
    stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    stats_log_tick.reset();

    state_tx.send_replace(CollectorState::Running);
    tracing::info!(interval_secs = config.interval.as_secs(), "collector started");

    let mut saved_since_render: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let saved = run_cycle(reader.as_ref(), &history_repo, &stats, &state_tx).await;
                state_tx.send_replace(CollectorState::Idle);
                if !saved {
                    continue;
                }
                saved_since_render += 1;
                let Some(renderer) = renderer.as_deref() else {
                    continue;
                };
                if config.render_every_cycles == 0 || saved_since_render < config.render_every_cycles {
                    continue;
                }
                saved_since_render = 0;
                let now = chrono::Utc::now().timestamp();
                if let Err(e) = render::render(&history_repo, renderer, config.window_days, now).await {
                    stats.renders_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, operation = "render", "render failed");
                }
            }
            _ = stats_log_tick.tick() => {
                let v = stats.view();
                tracing::info!(
                    cycles = v.cycles,
                    device_errors = v.device_errors,
                    storage_errors = v.storage_errors,
                    snapshots_saved = v.snapshots_saved,
                    renders_failed = v.renders_failed,
                    "collector stats"
                );
            }
        }
    }

    state_tx.send_replace(CollectorState::Stopping);
    tracing::info!("collector stopping");
    state_tx.send_replace(CollectorState::Stopped);
}

/// One poll + write. Returns whether a snapshot was persisted.
async fn run_cycle<R: DeviceReader>(
    reader: &R,
    history_repo: &HistoryRepo,
    stats: &CollectorStats,
    state_tx: &watch::Sender<CollectorState>,
) -> bool {
    let cycle = stats.cycles.fetch_add(1, Ordering::Relaxed) + 1;

    state_tx.send_replace(CollectorState::Polling);
    let reading = match reader.poll().await {
        Ok(r) => r,
        Err(e) => {
            stats.device_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %e,
                kind = e.kind(),
                operation = "poll",
                cycle,
                "device poll failed; retrying next cycle"
            );
            return false;
        }
    };

    state_tx.send_replace(CollectorState::Writing);
    let snapshot = reading.snapshot;
    if snapshot.is_partial_empty() {
        tracing::debug!(timestamp = snapshot.timestamp, "device returned no readings; storing timestamp only");
    }
    if let Err(e) = history_repo.append(&snapshot).await {
        stats.storage_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            error = %e,
            kind = e.kind(),
            operation = "append",
            timestamp = snapshot.timestamp,
            cycle,
            "snapshot dropped"
        );
        return false;
    }
    stats.snapshots_saved.fetch_add(1, Ordering::Relaxed);

    if let Some(raw) = reading.raw
        && let Err(e) = history_repo.append_raw(snapshot.timestamp, &raw).await
    {
        tracing::warn!(
            error = %e,
            operation = "append_raw",
            timestamp = snapshot.timestamp,
            "raw payload not stored"
        );
    }

    tracing::debug!(timestamp = snapshot.timestamp, cycle, "snapshot saved");
    true
}
