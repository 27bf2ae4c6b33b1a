//! The `cron_jobs` table and its lifecycle operations.
//!
//! Jobs carry either a skill name or a shell command (exactly one), a
//! schedule expression from the grammar in [`crate::schedule`], and run
//! state: `last_run`, `next_run`, and a consecutive-failure counter that
//! auto-pauses the job at the configured threshold.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::schedule;

/// A scheduled job row.
#[derive(Clone, Debug)]
pub struct CronJob {
    pub id: i64,
    pub name: String,
    /// Schedule expression (see the grammar).
    pub schedule: String,
    /// Skill to invoke when fired. Mutually exclusive with `command`.
    pub skill_name: String,
    /// Shell command / prompt text. Mutually exclusive with `skill_name`.
    pub command: String,
    /// JSON params text passed to the skill.
    pub params: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub fail_count: i64,
    pub created_at: DateTime<Utc>,
}

impl CronJob {
    /// One-shot jobs auto-pause after firing once.
    pub fn is_oneshot(&self) -> bool {
        schedule::is_oneshot_expr(&self.schedule)
    }

    /// What the job runs: the command, or a skill invocation line.
    pub fn payload(&self) -> String {
        if self.command.is_empty() {
            format!("use skill '{}' with params {}", self.skill_name, self.params)
        } else {
            self.command.clone()
        }
    }
}

/// SQLite-backed job table.
pub struct CronStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for CronStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronStore").finish_non_exhaustive()
    }
}

impl CronStore {
    /// Open (or create) the job table at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cron_jobs (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT    NOT NULL,
                schedule   TEXT    NOT NULL,
                skill_name TEXT    NOT NULL DEFAULT '',
                command    TEXT    NOT NULL DEFAULT '',
                params     TEXT    NOT NULL DEFAULT '{}',
                enabled    INTEGER NOT NULL DEFAULT 1,
                last_run   TEXT,
                next_run   TEXT    NOT NULL,
                fail_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT    NOT NULL
            );",
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────

    /// Create a job. The schedule is validated and `next_run` computed
    /// from `now`. Exactly one of `skill_name`/`command` must be set.
    pub fn create(
        &self,
        name: &str,
        schedule_expr: &str,
        skill_name: &str,
        command: &str,
        params: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        if skill_name.is_empty() == command.is_empty() {
            anyhow::bail!("a job needs exactly one of skill_name or command");
        }

        let next = schedule::next_run(schedule_expr, now)?;
        let params = if params.is_empty() { "{}" } else { params };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cron_jobs (name, schedule, skill_name, command, params, next_run, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                name,
                schedule_expr.trim().to_lowercase(),
                skill_name,
                command,
                params,
                next.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(id, name, schedule = schedule_expr, "created cron job");
        Ok(id)
    }

    /// Jobs due to fire: enabled and `next_run <= now`.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<CronJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, schedule, skill_name, command, params, enabled,
                    last_run, next_run, fail_count, created_at
             FROM cron_jobs WHERE enabled = 1 AND next_run <= ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_job)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All jobs, ordered by id.
    pub fn list(&self) -> Result<Vec<CronJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, schedule, skill_name, command, params, enabled,
                    last_run, next_run, fail_count, created_at
             FROM cron_jobs ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_job)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Fetch one job.
    pub fn get(&self, id: i64) -> Result<Option<CronJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, schedule, skill_name, command, params, enabled,
                    last_run, next_run, fail_count, created_at
             FROM cron_jobs WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_job)?;
        match rows.next() {
            Some(job) => Ok(Some(job?)),
            None => Ok(None),
        }
    }

    /// Delete a job. Returns whether it existed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM cron_jobs WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Disable a job.
    pub fn pause(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("UPDATE cron_jobs SET enabled = 0 WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Re-enable a job: zero the failure count and make it due now.
    pub fn resume(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE cron_jobs SET enabled = 1, fail_count = 0, next_run = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id],
        )?;
        Ok(n > 0)
    }

    /// Record a successful fire: stamp `last_run`, advance `next_run`,
    /// zero the failure count.
    pub fn record_success(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let Some(job) = self.get(id)? else {
            return Ok(());
        };
        let next = schedule::next_run(&job.schedule, now)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE cron_jobs SET last_run = ?1, next_run = ?2, fail_count = 0 WHERE id = ?3",
            params![now.to_rfc3339(), next.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Record a failed fire. At `threshold` consecutive failures the job
    /// is disabled. Returns true when this call auto-paused the job.
    pub fn record_failure(&self, id: i64, threshold: i64, now: DateTime<Utc>) -> Result<bool> {
        let Some(job) = self.get(id)? else {
            return Ok(false);
        };
        let fails = job.fail_count + 1;
        let pause = fails >= threshold;
        let next = schedule::next_run(&job.schedule, now)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE cron_jobs
             SET last_run = ?1, next_run = ?2, fail_count = ?3, enabled = ?4
             WHERE id = ?5",
            params![now.to_rfc3339(), next.to_rfc3339(), fails, !pause, id],
        )?;

        if pause {
            warn!(id, name = %job.name, fails, "job auto-paused after consecutive failures");
        }
        Ok(pause)
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<CronJob> {
    let last_run: Option<String> = row.get(7)?;
    let next_run: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    Ok(CronJob {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule: row.get(2)?,
        skill_name: row.get(3)?,
        command: row.get(4)?,
        params: row.get(5)?,
        enabled: row.get(6)?,
        last_run: last_run.as_deref().map(parse_ts),
        next_run: parse_ts(&next_run),
        fail_count: row.get(9)?,
        created_at: parse_ts(&created_at),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
