//! `cronix-core`: configuration shared by the engine and the daemon.

pub mod config;
pub mod error;

pub use config::{CronixConfig, DatabaseConfig, SchedulerConfig};
pub use error::{CronixError, Result};
