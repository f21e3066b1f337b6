//! `cronix-scheduler`: cron-triggered HTTP jobs with bounded execution history.
//!
//! # Overview
//!
//! | Piece                        | Role                                                  |
//! |------------------------------|-------------------------------------------------------|
//! | [`trigger::Trigger`]         | parsed cron expression + next fire instant            |
//! | [`registry::JobRegistry`]    | job id → trigger, one mutex around all access         |
//! | [`engine::Scheduler`]        | clock loop; spawns one task per trigger event         |
//! | [`executor::Executor`]       | one HTTP call per run, bounded, always yields a log   |
//! | [`retention::Retention`]     | keeps the newest N logs per job                       |
//! | [`store::SqliteStore`]       | `jobs` / `job_logs` persistence                       |
//! | [`service::JobService`]      | CRUD that keeps store and scheduler in step           |
//!
//! Schedules use the seconds-first cron syntax, e.g. `"*/30 * * * * *"`.

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod retention;
pub mod service;
pub mod store;
pub mod trigger;
pub mod types;

pub use engine::Scheduler;
pub use error::{ExecutionError, Result, SchedulerError};
pub use executor::Executor;
pub use retention::Retention;
pub use service::JobService;
pub use store::{JobStore, LogStore, SqliteStore};
pub use types::{ExecutionStatus, Job, JobLog, JobUpdate, NewJob};
