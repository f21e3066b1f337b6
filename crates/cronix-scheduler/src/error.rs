use std::time::Duration;

use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored column could not be (de)serialised (e.g. the headers JSON).
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cron expression could not be parsed.
    #[error("Invalid schedule {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// `start` was called on a scheduler whose clock is already running.
    #[error("Scheduler already started")]
    AlreadyStarted,

    /// The shared HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why an execution attempt failed.
///
/// Never returned from the executor: the `Display` text is stored in
/// [`JobLog::error`](crate::types::JobLog::error).
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Method, URL or a header could not be turned into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection, TLS or protocol failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The attempt exceeded the execution bound.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl ExecutionError {
    /// Flatten an error and its `source()` chain into one line.
    ///
    /// reqwest's top-level message ("error sending request") hides the
    /// useful part, e.g. "Connection refused".
    pub(crate) fn transport(err: &dyn std::error::Error) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        ExecutionError::Transport(message)
    }
}
