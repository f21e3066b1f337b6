use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::{
    engine::Scheduler,
    error::Result,
    store::{JobStore, LogStore},
    trigger::parse_schedule,
    types::{Job, JobLog, JobUpdate, NewJob},
};

pub const DEFAULT_JOB_PAGE: u32 = 20;
pub const DEFAULT_LOG_PAGE: u32 = 50;

/// Job operations for the API layer.
///
/// Every write goes to the store first and is then mirrored into the
/// scheduler, so the registry always reflects the stored `active` flag
/// and schedule. Writes hold `write_lock` across both steps, so a delete
/// never lands between an update's store write and its `add_job`.
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    logs: Arc<dyn LogStore>,
    scheduler: Arc<Scheduler>,
    write_lock: Mutex<()>,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobStore>, logs: Arc<dyn LogStore>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            jobs,
            logs,
            scheduler,
            write_lock: Mutex::new(()),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Validate, store, and (if active) schedule a new job.
    ///
    /// An unparsable schedule is rejected before anything is stored.
    #[instrument(skip(self, new), fields(owner_id = %new.owner_id, name = %new.name))]
    pub async fn create(&self, new: NewJob) -> Result<Job> {
        parse_schedule(&new.schedule)?;
        let _guard = self.write_lock.lock().await;
        let job = self.jobs.create_job(new).await?;
        self.scheduler.add_job(job.clone())?;
        Ok(job)
    }

    /// Apply a partial update and re-sync the trigger.
    ///
    /// Deactivating removes the trigger; (re)activating or changing the
    /// schedule installs a fresh one.
    #[instrument(skip(self, update))]
    pub async fn update(&self, id: &str, update: JobUpdate) -> Result<Job> {
        if let Some(schedule) = &update.schedule {
            parse_schedule(schedule)?;
        }
        let _guard = self.write_lock.lock().await;
        let job = self.jobs.update_job(id, update).await?;
        self.scheduler.add_job(job.clone())?;
        Ok(job)
    }

    /// Unschedule, then delete the job and its logs.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.scheduler.remove_job(id);
        self.jobs.delete_job(id).await
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        self.jobs.get_job(id).await
    }

    pub async fn list_for_owner(
        &self,
        owner_id: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Job>> {
        self.jobs
            .list_jobs_for_owner(
                owner_id,
                limit.unwrap_or(DEFAULT_JOB_PAGE),
                offset.unwrap_or(0),
            )
            .await
    }

    /// Execute a job immediately, outside its schedule.
    ///
    /// Unlike a scheduled fire, a failure to save the log is returned.
    #[instrument(skip(self))]
    pub async fn run_now(&self, id: &str) -> Result<JobLog> {
        let job = self.jobs.get_job(id).await?;
        info!(job_id = %job.id, name = %job.name, "running job on demand");
        self.scheduler.executor().run_once(&job).await
    }

    pub async fn list_logs(
        &self,
        job_id: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<JobLog>> {
        self.logs
            .list_logs(
                job_id,
                limit.unwrap_or(DEFAULT_LOG_PAGE),
                offset.unwrap_or(0),
            )
            .await
    }

    /// The retained history of a job, newest first.
    pub async fn recent_logs(&self, job_id: &str) -> Result<Vec<JobLog>> {
        let keep = self.scheduler.executor().retention().keep();
        self.logs
            .list_logs(job_id, u32::try_from(keep).unwrap_or(u32::MAX), 0)
            .await
    }

    /// Enforce the retention keep-count across every job. Returns rows removed.
    #[instrument(skip(self))]
    pub async fn cleanup_all_logs(&self) -> Result<u64> {
        let removed = self.scheduler.executor().retention().prune_all().await?;
        info!(removed, "cleaned up old logs");
        Ok(removed)
    }
}
