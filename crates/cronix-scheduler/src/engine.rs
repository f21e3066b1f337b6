use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronix_core::config::SchedulerConfig;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    executor::Executor,
    registry::JobRegistry,
    types::Job,
};

/// Drives trigger events for the registered jobs.
///
/// One clock task scans the [`JobRegistry`] every tick; each due job is
/// handed to its own tokio task so a slow endpoint never delays other
/// triggers. Executions of the same job are not serialised: if one run
/// overruns the next fire time, both are in flight together.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    executor: Arc<Executor>,
    tick_interval: Duration,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(executor: Arc<Executor>, config: &SchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Arc::new(JobRegistry::new()),
            executor,
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
            started: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Install triggers for every active job in `jobs`, then start the clock.
    ///
    /// Inactive jobs are ignored. A job whose schedule does not parse is
    /// logged and skipped; the others still start. Must be called from
    /// within a tokio runtime, and only once.
    pub fn start(&self, jobs: Vec<Job>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let now = Utc::now();
        let mut installed = 0usize;
        for job in jobs.into_iter().filter(|j| j.active) {
            let (id, name) = (job.id.clone(), job.name.clone());
            match self.registry.install(job, now) {
                Ok(_) => installed += 1,
                Err(e) => error!(job_id = %id, %name, error = %e, "skipping job with invalid schedule"),
            }
        }

        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);
        let shutdown = self.shutdown.subscribe();
        let tick_interval = self.tick_interval;
        tokio::spawn(run_clock(registry, executor, tick_interval, shutdown));

        info!(jobs = installed, tick_ms = tick_interval.as_millis() as u64, "scheduler started");
        Ok(())
    }

    /// Install or replace the trigger for `job`.
    ///
    /// An inactive job only has its trigger removed. On `InvalidSchedule`
    /// the job is left with no trigger at all, even if it had one before.
    pub fn add_job(&self, job: Job) -> Result<()> {
        if !job.active {
            self.remove_job(&job.id);
            return Ok(());
        }

        let (id, schedule) = (job.id.clone(), job.schedule.clone());
        match self.registry.install(job, Utc::now()) {
            Ok(replaced) => {
                info!(job_id = %id, %schedule, replaced, "job scheduled");
                Ok(())
            }
            Err(e) => {
                warn!(job_id = %id, %schedule, error = %e, "job not scheduled");
                Err(e)
            }
        }
    }

    /// Remove the trigger for `job_id`. Unknown ids are a no-op.
    pub fn remove_job(&self, job_id: &str) {
        if self.registry.remove(job_id) {
            info!(job_id, "job unscheduled");
        }
    }

    /// Halt the clock. No trigger fires once this returns; executions
    /// already dispatched run to completion or their own timeout.
    pub fn stop(&self) {
        self.registry.halt();
        self.shutdown.send_replace(true);
        info!("scheduler stopped");
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.registry.contains(job_id)
    }

    pub fn scheduled_expression(&self, job_id: &str) -> Option<String> {
        self.registry.expression(job_id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.registry.len()
    }

    pub fn next_fire(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.registry.next_fire(job_id)
    }
}

/// Clock loop. Runs until `shutdown` flips to `true` or its sender is dropped.
async fn run_clock(
    registry: Arc<JobRegistry>,
    executor: Arc<Executor>,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // stop() may have run before start()
    if *shutdown.borrow_and_update() {
        return;
    }

    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.fire_due(Utc::now(), |job| dispatch(Arc::clone(&executor), job));
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("scheduler clock exited");
}

/// Spawn one isolated execution unit for `job`.
///
/// A panic inside the unit is caught here and logged; it never reaches
/// the clock or other executions.
fn dispatch(executor: Arc<Executor>, job: Arc<Job>) {
    tokio::spawn(async move {
        let unit = AssertUnwindSafe(execute_scheduled(&executor, &job)).catch_unwind();
        if let Err(panic) = unit.await {
            error!(
                job_id = %job.id,
                name = %job.name,
                panic = %panic_message(panic.as_ref()),
                "job execution panicked"
            );
        }
    });
}

async fn execute_scheduled(executor: &Executor, job: &Job) {
    info!(job_id = %job.id, name = %job.name, "running job");
    match executor.run_once(job).await {
        Ok(log) => info!(
            job_id = %job.id,
            status = %log.status,
            response_code = ?log.response_code,
            duration_ms = log.duration_ms,
            "job finished"
        ),
        // A scheduled run has nobody to report to; the next fire is the retry.
        Err(e) => error!(job_id = %job.id, error = %e, "job log could not be saved"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_common_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(owned.as_ref()), "kaboom");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
