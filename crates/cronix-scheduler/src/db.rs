use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection};

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` and `job_logs` tables (idempotent). Log rows cascade
/// with their job. `job_logs(job_id, started_at)` backs both the per-job
/// listing and retention's "newest N" subquery.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            owner_id    TEXT    NOT NULL,
            name        TEXT    NOT NULL,
            schedule    TEXT    NOT NULL,   -- cron expression, seconds field first
            endpoint    TEXT    NOT NULL,
            method      TEXT    NOT NULL,
            headers     TEXT,               -- JSON object or NULL
            body        TEXT,
            active      INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs (owner_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_jobs_active ON jobs (active);

        CREATE TABLE IF NOT EXISTS job_logs (
            id            TEXT    NOT NULL PRIMARY KEY,
            job_id        TEXT    NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
            started_at    TEXT    NOT NULL,
            finished_at   TEXT    NOT NULL,
            duration_ms   INTEGER NOT NULL,
            status        TEXT    NOT NULL,   -- 'success' | 'failure'
            response_code INTEGER,
            error         TEXT,
            response_body TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_job_logs_job ON job_logs (job_id, started_at DESC);
        ",
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 (microseconds, `Z`) so that string order is time order.
pub(crate) fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
