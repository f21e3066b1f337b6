#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cronix_core::config::SchedulerConfig;
use cronix_scheduler::{
    Executor, Job, JobLog, JobStore, JobUpdate, LogStore, NewJob, Result, Scheduler,
    SchedulerError, SqliteStore,
};

/// Engine config tuned for tests: fast clock, short bound.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 50,
        execution_timeout_secs: 5,
        ..SchedulerConfig::default()
    }
}

pub fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().expect("in-memory store"))
}

pub fn executor(logs: Arc<dyn LogStore>, config: &SchedulerConfig) -> Arc<Executor> {
    Arc::new(Executor::new(logs, config).expect("executor"))
}

pub fn scheduler(logs: Arc<dyn LogStore>) -> Scheduler {
    let config = test_config();
    Scheduler::new(executor(logs, &config), &config)
}

pub fn new_job(endpoint: &str, schedule: &str, active: bool) -> NewJob {
    NewJob {
        owner_id: "owner-1".to_string(),
        name: "test job".to_string(),
        schedule: schedule.to_string(),
        endpoint: endpoint.to_string(),
        method: "GET".to_string(),
        headers: HashMap::new(),
        body: None,
        active,
    }
}

/// Create and persist a job so log rows can reference it.
pub async fn stored_job(store: &SqliteStore, endpoint: &str, schedule: &str) -> Job {
    store
        .create_job(new_job(endpoint, schedule, true))
        .await
        .expect("create job")
}

/// A job value that was never persisted; only the registry sees it.
pub fn detached_job(id: &str, schedule: &str, active: bool) -> Job {
    let now = chrono::Utc::now();
    Job {
        id: id.to_string(),
        owner_id: "owner-1".to_string(),
        name: id.to_string(),
        schedule: schedule.to_string(),
        endpoint: "http://127.0.0.1:9/".to_string(),
        method: "GET".to_string(),
        headers: HashMap::new(),
        body: None,
        active,
        created_at: now,
        updated_at: now,
    }
}

/// An endpoint nothing listens on.
pub fn refused_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/hook")
}

/// Log store whose pruning always fails.
pub struct BrokenRetentionStore(pub Arc<SqliteStore>);

#[async_trait]
impl LogStore for BrokenRetentionStore {
    async fn insert_log(&self, log: &JobLog) -> Result<()> {
        self.0.insert_log(log).await
    }

    async fn list_logs(&self, job_id: &str, limit: u32, offset: u32) -> Result<Vec<JobLog>> {
        self.0.list_logs(job_id, limit, offset).await
    }

    async fn delete_logs_beyond(&self, _job_id: &str, _keep: usize) -> Result<u64> {
        Err(SchedulerError::Database(rusqlite::Error::InvalidQuery))
    }

    async fn delete_all_logs_beyond(&self, _keep: usize) -> Result<u64> {
        Err(SchedulerError::Database(rusqlite::Error::InvalidQuery))
    }
}

/// Log store that panics when asked to save a log for `poisoned_job`.
pub struct PanickingStore {
    pub inner: Arc<SqliteStore>,
    pub poisoned_job: String,
}

#[async_trait]
impl LogStore for PanickingStore {
    async fn insert_log(&self, log: &JobLog) -> Result<()> {
        if log.job_id == self.poisoned_job {
            panic!("simulated fault while saving log for {}", log.job_id);
        }
        self.inner.insert_log(log).await
    }

    async fn list_logs(&self, job_id: &str, limit: u32, offset: u32) -> Result<Vec<JobLog>> {
        self.inner.list_logs(job_id, limit, offset).await
    }

    async fn delete_logs_beyond(&self, job_id: &str, keep: usize) -> Result<u64> {
        self.inner.delete_logs_beyond(job_id, keep).await
    }

    async fn delete_all_logs_beyond(&self, keep: usize) -> Result<u64> {
        self.inner.delete_all_logs_beyond(keep).await
    }
}

/// Job store whose updates take `delay` to come back after the row is written.
pub struct SlowUpdateStore {
    pub inner: Arc<SqliteStore>,
    pub delay: Duration,
}

#[async_trait]
impl JobStore for SlowUpdateStore {
    async fn create_job(&self, new: NewJob) -> Result<Job> {
        self.inner.create_job(new).await
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        self.inner.get_job(id).await
    }

    async fn list_jobs_for_owner(&self, owner_id: &str, limit: u32, offset: u32) -> Result<Vec<Job>> {
        self.inner.list_jobs_for_owner(owner_id, limit, offset).await
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>> {
        self.inner.list_active_jobs().await
    }

    async fn update_job(&self, id: &str, update: JobUpdate) -> Result<Job> {
        let job = self.inner.update_job(id, update).await?;
        tokio::time::sleep(self.delay).await;
        Ok(job)
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        self.inner.delete_job(id).await
    }
}
