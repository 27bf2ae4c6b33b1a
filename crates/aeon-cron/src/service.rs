//! The scheduler service: a tick loop over the job table.
//!
//! Fires on start-up and then every 60 seconds. Each tick queries due
//! jobs, skips ones that are still running or would exceed the
//! concurrency cap, and invokes the registered trigger callback with a
//! five-minute deadline. Schedules shorter than the tick interval
//! coalesce to one fire per tick.
//!
//! The clock is injectable so tests can drive time deterministically.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::store::{CronJob, CronStore};

/// Seconds between ticks.
const TICK_INTERVAL_SECS: u64 = 60;
/// Deadline for a single job fire.
const FIRE_DEADLINE_SECS: u64 = 300;

/// Injectable time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Callback invoked when a job fires. The kernel binds this to publish a
/// synthetic inbound message (recurring jobs) or a direct reminder
/// (one-shots).
pub type OnFireFn = Arc<
    dyn Fn(CronJob) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync,
>;

/// The scheduler service.
pub struct CronService {
    store: Arc<CronStore>,
    clock: Arc<dyn Clock>,
    on_fire: Mutex<Option<OnFireFn>>,
    /// Jobs currently firing; a due job already in here is skipped.
    running: Arc<Mutex<HashSet<i64>>>,
    max_concurrent: usize,
    fail_threshold: i64,
    shutdown: Arc<Notify>,
}

impl CronService {
    pub fn new(
        store: Arc<CronStore>,
        clock: Arc<dyn Clock>,
        max_concurrent: usize,
        fail_threshold: i64,
    ) -> Self {
        Self {
            store,
            clock,
            on_fire: Mutex::new(None),
            running: Arc::new(Mutex::new(HashSet::new())),
            max_concurrent,
            fail_threshold,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register the trigger callback.
    pub fn set_on_fire(&self, callback: OnFireFn) {
        *self.on_fire.lock().unwrap() = Some(callback);
    }

    /// Shared access to the job store (for the cron management tool).
    pub fn store(&self) -> Arc<CronStore> {
        self.store.clone()
    }

    /// The service's clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Run the tick loop: once at start-up, then every 60 seconds,
    /// until `stop()` is called.
    pub async fn run(&self) {
        info!(interval_secs = TICK_INTERVAL_SECS, "cron service started");
        self.tick().await;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(TICK_INTERVAL_SECS)) => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    info!("cron service shutting down");
                    return;
                }
            }
        }
    }

    /// Stop the tick loop.
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Number of jobs currently firing.
    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// One scheduler tick: fire every due job within the concurrency cap.
    pub async fn tick(&self) {
        let now = self.clock.now();
        let due = match self.store.due_jobs(now) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to query due jobs");
                return;
            }
        };

        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "due cron jobs");

        let Some(callback) = self.on_fire.lock().unwrap().clone() else {
            warn!("no on_fire callback set, skipping tick");
            return;
        };

        for job in due {
            {
                let mut running = self.running.lock().unwrap();
                if running.contains(&job.id) {
                    debug!(id = job.id, "job still running, not stacking");
                    continue;
                }
                if running.len() >= self.max_concurrent {
                    warn!(id = job.id, cap = self.max_concurrent, "concurrency cap reached, deferring job");
                    continue;
                }
                running.insert(job.id);
            }

            // One-shots pause immediately so a crash between fire and
            // completion cannot replay them.
            if job.is_oneshot() {
                if let Err(e) = self.store.pause(job.id) {
                    error!(id = job.id, error = %e, "failed to pause one-shot job");
                }
            }

            self.fire(job, callback.clone());
        }
    }

    /// Fire one job in the background with the five-minute deadline.
    fn fire(&self, job: CronJob, callback: OnFireFn) {
        let store = self.store.clone();
        let clock = self.clock.clone();
        let running = self.running.clone();
        let threshold = self.fail_threshold;

        info!(id = job.id, name = %job.name, "firing cron job");

        tokio::spawn(async move {
            let id = job.id;
            let name = job.name.clone();
            let deadline = std::time::Duration::from_secs(FIRE_DEADLINE_SECS);

            let outcome = tokio::time::timeout(deadline, callback(job)).await;
            let now = clock.now();

            let result = match outcome {
                Ok(Ok(())) => store.record_success(id, now),
                Ok(Err(e)) => {
                    error!(id, name = %name, error = %e, "cron job failed");
                    store.record_failure(id, threshold, now).map(|_| ())
                }
                Err(_) => {
                    error!(id, name = %name, "cron job exceeded fire deadline");
                    store.record_failure(id, threshold, now).map(|_| ())
                }
            };
            if let Err(e) = result {
                error!(id, error = %e, "failed to record job outcome");
            }

            running.lock().unwrap().remove(&id);
        });
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
