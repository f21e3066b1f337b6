use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{error::Result, trigger::Trigger, types::Job};

struct Entry {
    job: Arc<Job>,
    trigger: Trigger,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    halted: bool,
}

/// Mapping from job id to its live trigger.
///
/// One `Mutex` guards the whole map: `install`/`remove` and the clock's
/// [`fire_due`](JobRegistry::fire_due) scan are mutually exclusive, so a
/// job id never has two triggers and a scan never sees a half-applied
/// replacement.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("job registry poisoned")
    }

    /// Replace-or-nothing install.
    ///
    /// Any existing trigger for `job.id` is dropped first; if the new
    /// expression does not parse the id is left without a trigger and the
    /// error is returned. Returns `true` when an older trigger was replaced.
    pub fn install(&self, job: Job, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.lock();
        let replaced = inner.entries.remove(&job.id).is_some();
        let trigger = Trigger::new(&job.schedule, now)?;
        debug!(job_id = %job.id, next_fire = ?trigger.next_fire(), replaced, "trigger installed");
        inner.entries.insert(
            job.id.clone(),
            Entry {
                job: Arc::new(job),
                trigger,
            },
        );
        Ok(replaced)
    }

    /// Drop the trigger for `job_id`. Returns whether one existed.
    pub fn remove(&self, job_id: &str) -> bool {
        self.lock().entries.remove(job_id).is_some()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().entries.contains_key(job_id)
    }

    /// Cron expression of the installed trigger, if any.
    pub fn expression(&self, job_id: &str) -> Option<String> {
        self.lock()
            .entries
            .get(job_id)
            .map(|e| e.trigger.expression().to_string())
    }

    pub fn next_fire(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .entries
            .get(job_id)
            .and_then(|e| e.trigger.next_fire())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out trigger events. Irreversible.
    ///
    /// Takes the same lock as [`fire_due`](JobRegistry::fire_due): once this
    /// returns, no scan in progress can still dispatch.
    pub fn halt(&self) {
        self.lock().halted = true;
    }

    /// Poll every trigger at `now` and call `dispatch` for each due job.
    ///
    /// `dispatch` runs with the registry lock held and must only hand the
    /// job off (e.g. spawn a task), never execute it. Returns the number
    /// of jobs dispatched.
    pub fn fire_due<F>(&self, now: DateTime<Utc>, mut dispatch: F) -> usize
    where
        F: FnMut(Arc<Job>),
    {
        let mut inner = self.lock();
        if inner.halted {
            return 0;
        }
        let mut fired = 0;
        for entry in inner.entries.values_mut() {
            if entry.trigger.poll(now) {
                dispatch(Arc::clone(&entry.job));
                fired += 1;
            }
        }
        fired
    }
}
