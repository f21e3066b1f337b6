use std::sync::Arc;

use tracing::debug;

use crate::{error::Result, store::LogStore};

/// Keeps per-job execution history bounded to the `keep` most recent rows.
#[derive(Clone)]
pub struct Retention {
    logs: Arc<dyn LogStore>,
    keep: usize,
}

impl Retention {
    pub fn new(logs: Arc<dyn LogStore>, keep: usize) -> Self {
        Self { logs, keep }
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Delete the oldest logs of `job_id` beyond the keep-count.
    ///
    /// Safe to race with another prune of the same job: both converge on
    /// the same surviving rows.
    pub async fn prune(&self, job_id: &str) -> Result<u64> {
        let removed = self.logs.delete_logs_beyond(job_id, self.keep).await?;
        if removed > 0 {
            debug!(job_id, removed, keep = self.keep, "pruned job logs");
        }
        Ok(removed)
    }

    /// Apply the keep-count to every job's history.
    pub async fn prune_all(&self) -> Result<u64> {
        let removed = self.logs.delete_all_logs_beyond(self.keep).await?;
        debug!(removed, keep = self.keep, "pruned logs for all jobs");
        Ok(removed)
    }
}
