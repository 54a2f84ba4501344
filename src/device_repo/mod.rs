// Boiler access. The vendor protocol (OAuth, device discovery) lives in an external
// helper program; this side spawns it once per poll and validates what it prints.
//
// Helper contract: print one JSON object of readings on stdout and exit 0.
// Exit 2 = authentication failure, exit 3 = feature missing on the appliance,
// anything else = transport failure. stderr is quoted into the error.

pub mod payload;

use std::collections::BTreeMap;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tracing::instrument;

use crate::error::DeviceError;
use crate::models::Snapshot;

pub use payload::snapshot_from_json;

const EXIT_AUTH: i32 = 2;
const EXIT_MISSING_FEATURE: i32 = 3;
const STDERR_EXCERPT: usize = 512;

/// One successful poll: the validated snapshot and, when available, the device's
/// payload verbatim.
#[derive(Debug, Clone)]
pub struct DeviceReading {
    pub snapshot: Snapshot,
    pub raw: Option<serde_json::Value>,
}

impl From<Snapshot> for DeviceReading {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            raw: None,
        }
    }
}

/// Source of snapshots. Every error is treated as retryable by the collector.
pub trait DeviceReader: Send + Sync {
    fn poll(&self) -> impl Future<Output = Result<DeviceReading, DeviceError>> + Send;
}

/// Runs the configured helper command once per poll.
pub struct CommandReader {
    program: String,
    args: Vec<String>,
    envs: BTreeMap<String, String>,
    timeout: Duration,
}

impl CommandReader {
    /// `command` is argv; returns `None` when it is empty.
    pub fn new(
        command: &[String],
        envs: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            envs,
            timeout,
        })
    }

    fn exit_error(code: Option<i32>, stderr: &[u8]) -> DeviceError {
        let text = String::from_utf8_lossy(stderr);
        let mut msg: String = text.trim().chars().take(STDERR_EXCERPT).collect();
        if msg.is_empty() {
            msg = match code {
                Some(c) => format!("helper exited with status {c}"),
                None => "helper terminated by signal".to_string(),
            };
        }
        match code {
            Some(EXIT_AUTH) => DeviceError::Auth(msg),
            Some(EXIT_MISSING_FEATURE) => DeviceError::MissingFeature(msg),
            _ => DeviceError::Network(msg),
        }
    }
}

impl DeviceReader for CommandReader {
    #[instrument(skip(self), fields(repo = "device", operation = "poll", program = %self.program))]
    async fn poll(&self) -> Result<DeviceReading, DeviceError> {
        let acquired_at = chrono::Utc::now().timestamp();

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => return Err(DeviceError::Timeout(self.timeout)),
            Ok(Err(e)) => {
                return Err(DeviceError::Network(format!(
                    "failed to run {}: {}",
                    self.program, e
                )));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(Self::exit_error(output.status.code(), &output.stderr));
        }

        let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DeviceError::InvalidPayload(format!("helper output is not JSON: {e}")))?;
        let snapshot = snapshot_from_json(&raw, acquired_at)?;
        tracing::debug!(
            timestamp = snapshot.timestamp,
            readings = snapshot.present_count(),
            "device polled"
        );
        Ok(DeviceReading {
            snapshot,
            raw: Some(raw),
        })
    }
}
