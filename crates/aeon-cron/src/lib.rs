//! SQL-backed job scheduler for Aeon: a small schedule grammar, a
//! `cron_jobs` table, and a 60-second tick loop with a concurrency cap.

pub mod schedule;
pub mod service;
pub mod store;

pub use schedule::{next_run, parse, Schedule};
pub use service::{Clock, CronService, SystemClock};
pub use store::{CronJob, CronStore};
