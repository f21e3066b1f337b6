use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 250;
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_RETENTION: usize = 5;
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024; // 1 MiB: response bodies are truncated past this

/// Top-level config (cronix.toml + CRONIX_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronixConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Knobs for the scheduling and execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the clock scans the registry for due triggers.
    /// Must stay well under one second to honour seconds-resolution schedules.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Upper bound on one execution's wall-clock time, measured from the
    /// start of the run. Saving the resulting log is not included.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Number of most recent log rows kept per job.
    #[serde(default = "default_log_retention")]
    pub log_retention: usize,
    /// Response bytes captured into a log row; the rest is discarded.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            execution_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            log_retention: DEFAULT_LOG_RETENTION,
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_execution_timeout_secs() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}
fn default_log_retention() -> usize {
    DEFAULT_LOG_RETENTION
}
fn default_max_response_bytes() -> usize {
    MAX_RESPONSE_BYTES
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronix/cronix.db", home)
}

impl CronixConfig {
    /// Load config from a TOML file with CRONIX_* env var overrides.
    ///
    /// The file is optional; every field has a default. Nested keys are
    /// separated by a double underscore since field names contain single
    /// ones, e.g. `CRONIX_SCHEDULER__LOG_RETENTION=10`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CronixConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONIX_").split("__"))
            .extract()
            .map_err(|e| crate::error::CronixError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronix/cronix.toml", home)
}
