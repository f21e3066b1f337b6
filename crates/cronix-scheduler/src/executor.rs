use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cronix_core::config::SchedulerConfig;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method, Request, Response, Url,
};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{ExecutionError, Result},
    retention::Retention,
    store::LogStore,
    types::{ExecutionStatus, Job, JobLog},
};

/// What came back from one HTTP attempt, before it becomes a [`JobLog`].
struct Outcome {
    response_code: Option<u16>,
    response_body: Option<String>,
    error: Option<ExecutionError>,
}

impl Outcome {
    fn failed(error: ExecutionError) -> Self {
        Self {
            response_code: None,
            response_body: None,
            error: Some(error),
        }
    }
}

/// Turns a [`Job`] into one bounded HTTP call and a persisted [`JobLog`].
pub struct Executor {
    client: Client,
    logs: Arc<dyn LogStore>,
    retention: Retention,
    timeout: Duration,
    max_response_bytes: usize,
}

impl Executor {
    pub fn new(logs: Arc<dyn LogStore>, config: &SchedulerConfig) -> Result<Self> {
        // No client-level timeout: the execution bound below covers the whole
        // send + body read.
        let client = Client::builder()
            .user_agent(concat!("cronix/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            retention: Retention::new(Arc::clone(&logs), config.log_retention),
            logs,
            timeout: Duration::from_secs(config.execution_timeout_secs),
            max_response_bytes: config.max_response_bytes,
        })
    }

    /// Override the execution bound (config is in whole seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retention(&self) -> &Retention {
        &self.retention
    }

    /// Execute `job` once and persist the outcome.
    ///
    /// The execution bound is measured from the start of the call and
    /// covers building the request, sending it and reading the body.
    ///
    /// HTTP-level problems (bad request, transport error, timeout) never
    /// produce `Err`; they are recorded as a `failure` log. Any received
    /// response, 4xx/5xx included, is a `success` with its status code.
    /// `Err` means only that the log row could not be written. Pruning old
    /// logs afterwards is best-effort and never fails the call.
    pub async fn run_once(&self, job: &Job) -> Result<JobLog> {
        let started_at = Utc::now();
        // The bound runs from here; saving the log afterwards is not counted.
        let deadline = Instant::now() + self.timeout;

        let outcome = match self.build_request(job) {
            Ok(request) => self.send(request, deadline).await,
            Err(e) => Outcome::failed(e),
        };

        let finished_at = Utc::now();
        let status = if outcome.error.is_some() {
            ExecutionStatus::Failure
        } else {
            ExecutionStatus::Success
        };
        let log = JobLog {
            id: Uuid::now_v7().to_string(),
            job_id: job.id.clone(),
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            status,
            response_code: outcome.response_code,
            error: outcome.error.map(|e| e.to_string()),
            response_body: outcome.response_body,
        };

        debug!(
            job_id = %job.id,
            status = %log.status,
            response_code = ?log.response_code,
            duration_ms = log.duration_ms,
            "execution finished"
        );

        self.logs.insert_log(&log).await?;

        if let Err(e) = self.retention.prune(&job.id).await {
            warn!(job_id = %job.id, error = %e, "log retention failed");
        }

        Ok(log)
    }

    fn build_request(&self, job: &Job) -> std::result::Result<Request, ExecutionError> {
        let method = Method::from_bytes(job.method.as_bytes()).map_err(|e| {
            ExecutionError::InvalidRequest(format!("method {:?}: {e}", job.method))
        })?;

        let url = Url::parse(&job.endpoint).map_err(|e| {
            ExecutionError::InvalidRequest(format!("endpoint {:?}: {e}", job.endpoint))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExecutionError::InvalidRequest(format!(
                "endpoint {:?}: unsupported scheme {:?}",
                job.endpoint,
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::with_capacity(job.headers.len());
        for (name, value) in &job.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ExecutionError::InvalidRequest(format!("header {name:?}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ExecutionError::InvalidRequest(format!("header {name:?}: {e}")))?;
            headers.insert(header_name, header_value);
        }

        self.client
            .request(method, url)
            .headers(headers)
            .body(job.body.clone().unwrap_or_default())
            .build()
            .map_err(|e| ExecutionError::InvalidRequest(e.to_string()))
    }

    async fn send(&self, request: Request, deadline: Instant) -> Outcome {
        let exchange = async {
            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| ExecutionError::transport(&e))?;
            let code = response.status().as_u16();
            let body = read_capped(response, self.max_response_bytes).await;
            Ok::<_, ExecutionError>((code, body))
        };

        // Dropping `exchange` on expiry aborts the in-flight request.
        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(Ok((code, body))) => Outcome {
                response_code: Some(code),
                response_body: (!body.is_empty())
                    .then(|| String::from_utf8_lossy(&body).into_owned()),
                error: None,
            },
            Ok(Err(e)) => Outcome::failed(e),
            Err(_) => Outcome::failed(ExecutionError::Timeout(self.timeout)),
        }
    }
}

/// Read at most `cap` bytes of the body; the rest is discarded.
///
/// A body that breaks off mid-stream keeps what was read: the response
/// itself was received, so the attempt still counts as delivered.
async fn read_capped(mut response: Response, cap: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = cap - buf.len();
                if chunk.len() >= room {
                    buf.extend_from_slice(&chunk[..room]);
                    break;
                }
                buf.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, bytes = buf.len(), "response body ended early");
                break;
            }
        }
    }
    buf
}
