use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A recurring HTTP action as persisted in the `jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// UUID v7 string, primary key, immutable after creation.
    pub id: String,
    /// Owning user. Only used for listing; the engine never looks at it.
    pub owner_id: String,
    /// Human-readable label.
    pub name: String,
    /// Cron expression with a seconds field, e.g. `"*/30 * * * * *"`.
    pub schedule: String,
    /// Target URL.
    pub endpoint: String,
    /// HTTP verb, sent as given.
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request payload, sent verbatim. `None` sends an empty body.
    pub body: Option<String>,
    /// Only active jobs hold a trigger in the scheduler.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a job; ids and timestamps are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub owner_id: String,
    pub name: String,
    pub schedule: String,
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// Partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    /// `Some(None)` clears the body; an explicit JSON `null` deserializes to it.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Option<String>>,
    pub active: Option<bool>,
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl JobUpdate {
    pub(crate) fn apply(self, job: &mut Job) {
        if let Some(name) = self.name {
            job.name = name;
        }
        if let Some(schedule) = self.schedule {
            job.schedule = schedule;
        }
        if let Some(endpoint) = self.endpoint {
            job.endpoint = endpoint;
        }
        if let Some(method) = self.method {
            job.method = method;
        }
        if let Some(headers) = self.headers {
            job.headers = headers;
        }
        if let Some(body) = self.body {
            job.body = body;
        }
        if let Some(active) = self.active {
            job.active = active;
        }
    }
}

/// Whether an execution attempt completed.
///
/// An HTTP response of any status counts as `Success`; the code itself is
/// kept in [`JobLog::response_code`]. `Failure` means no response was
/// obtained (bad request, transport error, timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failure" => Ok(ExecutionStatus::Failure),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Immutable record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    /// UUID v7. Sorts by creation time; breaks retention ties.
    pub id: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: ExecutionStatus,
    /// Set only when an HTTP response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    /// Set only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured (possibly truncated) response body, never empty when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}
