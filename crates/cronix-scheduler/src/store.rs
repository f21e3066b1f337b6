use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    db::{from_db_time, init_db, to_db_time},
    error::{Result, SchedulerError},
    types::{ExecutionStatus, Job, JobLog, JobUpdate, NewJob},
};

/// Persistence for job definitions.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, new: NewJob) -> Result<Job>;

    /// Returns `JobNotFound` for unknown ids.
    async fn get_job(&self, id: &str) -> Result<Job>;

    /// Jobs owned by `owner_id`, newest first.
    async fn list_jobs_for_owner(&self, owner_id: &str, limit: u32, offset: u32)
        -> Result<Vec<Job>>;

    /// Every job with `active = true`; used once at boot.
    async fn list_active_jobs(&self) -> Result<Vec<Job>>;

    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<Job>;

    /// Deletes the job and its logs.
    async fn delete_job(&self, id: &str) -> Result<()>;
}

/// Persistence for execution history.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert_log(&self, log: &JobLog) -> Result<()>;

    /// Logs for `job_id`, newest first.
    async fn list_logs(&self, job_id: &str, limit: u32, offset: u32) -> Result<Vec<JobLog>>;

    /// Delete all but the `keep` newest logs of `job_id`. Returns rows removed.
    async fn delete_logs_beyond(&self, job_id: &str, keep: usize) -> Result<u64>;

    /// Same as [`LogStore::delete_logs_beyond`] for every job at once.
    async fn delete_all_logs_beyond(&self, keep: usize) -> Result<u64>;
}

const JOB_COLUMNS: &str = "id, owner_id, name, schedule, endpoint, method, headers, body,
                           active, created_at, updated_at";

const LOG_COLUMNS: &str = "id, job_id, started_at, finished_at, duration_ms, status,
                           response_code, error, response_body";

/// SQLite-backed [`JobStore`] + [`LogStore`].
///
/// Wraps a single connection in a `Mutex`; every statement runs with the
/// lock held and no `.await` in between, so the async methods never block
/// on each other across suspension points.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Take ownership of `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Private in-memory database, handy for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().expect("job store connection poisoned")
    }
}

fn fetch_job(conn: &Connection, id: &str) -> Result<Job> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        [id],
        row_to_job,
    )
    .optional()?
    .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
}

fn write_job(conn: &Connection, job: &Job) -> Result<usize> {
    let headers = encode_headers(&job.headers)?;
    let n = conn.execute(
        "UPDATE jobs SET name=?2, schedule=?3, endpoint=?4, method=?5, headers=?6,
                         body=?7, active=?8, updated_at=?9
         WHERE id=?1",
        params![
            job.id,
            job.name,
            job.schedule,
            job.endpoint,
            job.method,
            headers,
            job.body,
            job.active,
            to_db_time(&job.updated_at),
        ],
    )?;
    Ok(n)
}

#[async_trait]
impl JobStore for SqliteStore {
    #[instrument(skip(self, new), fields(owner_id = %new.owner_id, name = %new.name))]
    async fn create_job(&self, new: NewJob) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::now_v7().to_string(),
            owner_id: new.owner_id,
            name: new.name,
            schedule: new.schedule,
            endpoint: new.endpoint,
            method: new.method,
            headers: new.headers,
            body: new.body,
            active: new.active,
            created_at: now,
            updated_at: now,
        };
        let headers = encode_headers(&job.headers)?;
        let now_str = to_db_time(&now);

        self.conn().execute(
            "INSERT INTO jobs
             (id, owner_id, name, schedule, endpoint, method, headers, body,
              active, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?10)",
            params![
                job.id,
                job.owner_id,
                job.name,
                job.schedule,
                job.endpoint,
                job.method,
                headers,
                job.body,
                job.active,
                now_str,
            ],
        )?;
        info!(job_id = %job.id, "job created");
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        fetch_job(&self.conn(), id)
    }

    async fn list_jobs_for_owner(
        &self,
        owner_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE owner_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let jobs = stmt
            .query_map(params![owner_id, limit, offset], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE active = 1 ORDER BY created_at"
        ))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    #[instrument(skip(self, update))]
    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<Job> {
        let conn = self.conn();
        // Read-modify-write under one lock so concurrent partial updates
        // never interleave.
        let mut job = fetch_job(&conn, id)?;
        update.apply(&mut job);
        job.updated_at = Utc::now();
        if write_job(&conn, &job)? == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        debug!(job_id = %id, active = job.active, "job updated");
        Ok(job)
    }

    #[instrument(skip(self))]
    async fn delete_job(&self, id: &str) -> Result<()> {
        // job_logs rows go with the job via ON DELETE CASCADE
        let n = self.conn().execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "job deleted");
        Ok(())
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn insert_log(&self, log: &JobLog) -> Result<()> {
        self.conn().execute(
            "INSERT INTO job_logs
             (id, job_id, started_at, finished_at, duration_ms, status,
              response_code, error, response_body)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                log.id,
                log.job_id,
                to_db_time(&log.started_at),
                to_db_time(&log.finished_at),
                log.duration_ms,
                log.status.to_string(),
                log.response_code,
                log.error,
                log.response_body,
            ],
        )?;
        Ok(())
    }

    async fn list_logs(&self, job_id: &str, limit: u32, offset: u32) -> Result<Vec<JobLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM job_logs
             WHERE job_id = ?1
             ORDER BY started_at DESC, id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let logs = stmt
            .query_map(params![job_id, limit, offset], row_to_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    async fn delete_logs_beyond(&self, job_id: &str, keep: usize) -> Result<u64> {
        // Deleting a row another prune already removed is a no-op, so two
        // overlapping calls both converge on the same newest `keep` rows.
        let n = self.conn().execute(
            "DELETE FROM job_logs
             WHERE job_id = ?1
               AND id NOT IN (
                   SELECT id FROM job_logs
                   WHERE job_id = ?1
                   ORDER BY started_at DESC, id DESC
                   LIMIT ?2
               )",
            params![job_id, keep as i64],
        )?;
        Ok(n as u64)
    }

    async fn delete_all_logs_beyond(&self, keep: usize) -> Result<u64> {
        let n = self.conn().execute(
            "DELETE FROM job_logs
             WHERE id IN (
                 SELECT id FROM (
                     SELECT id, ROW_NUMBER() OVER (
                         PARTITION BY job_id ORDER BY started_at DESC, id DESC
                     ) AS rank
                     FROM job_logs
                 )
                 WHERE rank > ?1
             )",
            params![keep as i64],
        )?;
        Ok(n as u64)
    }
}

fn encode_headers(headers: &HashMap<String, String>) -> Result<Option<String>> {
    if headers.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(headers)?))
}

/// Map a `jobs` row (selected with [`JOB_COLUMNS`]) to a [`Job`].
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let headers = match row.get::<_, Option<String>>(6)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        None => HashMap::new(),
    };
    Ok(Job {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        schedule: row.get(3)?,
        endpoint: row.get(4)?,
        method: row.get(5)?,
        headers,
        body: row.get(7)?,
        active: row.get(8)?,
        created_at: from_db_time(9, &row.get::<_, String>(9)?)?,
        updated_at: from_db_time(10, &row.get::<_, String>(10)?)?,
    })
}

/// Map a `job_logs` row (selected with [`LOG_COLUMNS`]) to a [`JobLog`].
fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobLog> {
    let status: String = row.get(5)?;
    let status: ExecutionStatus = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e),
        )
    })?;
    Ok(JobLog {
        id: row.get(0)?,
        job_id: row.get(1)?,
        started_at: from_db_time(2, &row.get::<_, String>(2)?)?,
        finished_at: from_db_time(3, &row.get::<_, String>(3)?)?,
        duration_ms: row.get(4)?,
        status,
        response_code: row.get(6)?,
        error: row.get(7)?,
        response_body: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(owner: &str, name: &str, active: bool) -> NewJob {
        NewJob {
            owner_id: owner.to_string(),
            name: name.to_string(),
            schedule: "0 * * * * *".to_string(),
            endpoint: "http://127.0.0.1:9/hook".to_string(),
            method: "POST".to_string(),
            headers: HashMap::from([("X-Token".to_string(), "abc".to_string())]),
            body: Some(r#"{"ping":true}"#.to_string()),
            active,
        }
    }

    fn log_for(job_id: &str, offset_ms: i64) -> JobLog {
        let started_at = Utc::now() + chrono::Duration::milliseconds(offset_ms);
        JobLog {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.to_string(),
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            status: ExecutionStatus::Success,
            response_code: Some(200),
            error: None,
            response_body: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips_all_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store.create_job(new_job("u1", "ping", true)).await.unwrap();
        let fetched = store.get_job(&created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.headers.get("X-Token").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.get_job("missing").await,
            Err(SchedulerError::JobNotFound { .. })
        ));
        assert!(matches!(
            store.delete_job("missing").await,
            Err(SchedulerError::JobNotFound { .. })
        ));
        assert!(matches!(
            store.update_job("missing", JobUpdate::default()).await,
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_active_skips_inactive_jobs() {
        let store = SqliteStore::open_in_memory().unwrap();
        let on = store.create_job(new_job("u1", "on", true)).await.unwrap();
        store.create_job(new_job("u1", "off", false)).await.unwrap();

        let active = store.list_active_jobs().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, on.id);
    }

    #[tokio::test]
    async fn list_for_owner_paginates() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..3 {
            store
                .create_job(new_job("u1", &format!("job-{i}"), true))
                .await
                .unwrap();
        }
        store.create_job(new_job("u2", "other", true)).await.unwrap();

        let first = store.list_jobs_for_owner("u1", 2, 0).await.unwrap();
        let rest = store.list_jobs_for_owner("u1", 2, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(rest.len(), 1);
        assert!(first.iter().chain(&rest).all(|j| j.owner_id == "u1"));
    }

    #[tokio::test]
    async fn partial_update_keeps_other_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = store.create_job(new_job("u1", "ping", true)).await.unwrap();

        let updated = store
            .update_job(
                &job.id,
                JobUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(!updated.active);
        assert_eq!(updated.endpoint, job.endpoint);
        assert!(updated.updated_at >= job.updated_at);
        assert_eq!(store.get_job(&job.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn logs_are_listed_newest_first_and_trimmed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = store.create_job(new_job("u1", "ping", true)).await.unwrap();
        let logs: Vec<JobLog> = (0..4).map(|i| log_for(&job.id, i * 10)).collect();
        for log in &logs {
            store.insert_log(log).await.unwrap();
        }

        let listed = store.list_logs(&job.id, 10, 0).await.unwrap();
        assert_eq!(listed.first().unwrap().id, logs[3].id);

        assert_eq!(store.delete_logs_beyond(&job.id, 2).await.unwrap(), 2);
        // second prune finds nothing left to do
        assert_eq!(store.delete_logs_beyond(&job.id, 2).await.unwrap(), 0);

        let kept: Vec<String> = store
            .list_logs(&job.id, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(kept, vec![logs[3].id.clone(), logs[2].id.clone()]);
    }

    #[tokio::test]
    async fn trim_all_applies_per_job() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.create_job(new_job("u1", "a", true)).await.unwrap();
        let b = store.create_job(new_job("u1", "b", true)).await.unwrap();
        for i in 0..3 {
            store.insert_log(&log_for(&a.id, i)).await.unwrap();
        }
        store.insert_log(&log_for(&b.id, 0)).await.unwrap();

        assert_eq!(store.delete_all_logs_beyond(1).await.unwrap(), 2);
        assert_eq!(store.list_logs(&a.id, 10, 0).await.unwrap().len(), 1);
        assert_eq!(store.list_logs(&b.id, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_job_removes_its_logs() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = store.create_job(new_job("u1", "ping", true)).await.unwrap();
        let other = store.create_job(new_job("u1", "pong", true)).await.unwrap();
        store.insert_log(&log_for(&job.id, 0)).await.unwrap();
        store.insert_log(&log_for(&job.id, 1)).await.unwrap();
        store.insert_log(&log_for(&other.id, 0)).await.unwrap();

        store.delete_job(&job.id).await.unwrap();
        assert!(store.list_logs(&job.id, 10, 0).await.unwrap().is_empty());
        // the cascade is scoped to the deleted job
        assert_eq!(store.list_logs(&other.id, 10, 0).await.unwrap().len(), 1);
        assert!(matches!(
            store.delete_job(&job.id).await,
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn log_for_unknown_job_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.insert_log(&log_for("ghost", 0)).await;
        assert!(matches!(result, Err(SchedulerError::Database(_))));
    }
}
