//! Heartbeat service — periodic agent wake-up to check for tasks.
//!
//! The agent reads `HEARTBEAT.md` from the workspace on each tick and
//! executes any tasks listed there. Ticks are skipped entirely when the
//! file is absent or contains only headers/blank lines, so an idle
//! kernel never burns a provider call.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, error, info};

/// Default interval: 30 minutes.
pub const DEFAULT_HEARTBEAT_INTERVAL_S: u64 = 30 * 60;

/// The prompt sent to the agent on each heartbeat tick.
pub const HEARTBEAT_PROMPT: &str = r#"Read HEARTBEAT.md in your workspace.
Follow any instructions or tasks listed there.
If nothing needs attention, reply with just: HEARTBEAT_OK"#;

/// Callback invoked on each heartbeat tick. Receives the heartbeat prompt.
pub type OnHeartbeatFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

/// Periodic heartbeat that wakes the agent to check `HEARTBEAT.md`.
pub struct HeartbeatService {
    /// Workspace root (where `HEARTBEAT.md` lives).
    workspace: PathBuf,
    on_heartbeat: OnHeartbeatFn,
    interval_s: u64,
    shutdown: Arc<Notify>,
}

impl HeartbeatService {
    pub fn new(workspace: PathBuf, on_heartbeat: OnHeartbeatFn, interval_s: Option<u64>) -> Self {
        Self {
            workspace,
            on_heartbeat,
            interval_s: interval_s.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_S),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run the heartbeat loop until `stop()` is called.
    pub async fn run(&self) {
        info!(interval_s = self.interval_s, "heartbeat service started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.interval_s)) => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    info!("heartbeat service shutting down");
                    return;
                }
            }
        }
    }

    /// Stop the heartbeat loop.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Run one tick: skip if there is nothing to do, otherwise invoke the
    /// callback with the heartbeat prompt.
    pub async fn tick(&self) {
        if self.should_skip() {
            debug!("heartbeat skipped, no actionable tasks");
            return;
        }

        if let Err(e) = (self.on_heartbeat)(HEARTBEAT_PROMPT.to_string()).await {
            error!(error = %e, "heartbeat callback failed");
        }
    }

    /// Whether the tick should be skipped: `HEARTBEAT.md` missing, empty,
    /// or containing only markdown headers and blank lines.
    fn should_skip(&self) -> bool {
        let path = self.workspace.join("HEARTBEAT.md");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return true;
        };
        !content
            .lines()
            .map(str::trim)
            .any(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("<!--"))
    }
}
