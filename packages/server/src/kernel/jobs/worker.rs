//! Job worker service for processing queued jobs.
//!
//! The `JobWorker` is a long-running loop bound to one queue that:
//! - Claims up to its free concurrency slots of ready jobs
//! - Runs each job in its own task with lease heartbeats
//! - Reports success or failure back to the queue (which owns retry policy)
//! - Drains in-flight jobs on shutdown, releasing any that outlive the grace
//!   period
//!
//! # Architecture
//!
//! ```text
//! JobWorker (one per queue)
//!     │
//!     ├─► claim(queue, free slots)
//!     ├─► spawn task per job
//!     │       ├─► heartbeat loop
//!     │       └─► JobHandler.handle(job)
//!     └─► mark_succeeded / mark_failed
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::ErrorKind;
use super::queue::{ClaimedJob, FailureOutcome, JobQueue};

/// A failed job run, classified for the queue's retry policy.
#[derive(Debug)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub error: anyhow::Error,
}

impl JobFailure {
    pub fn retryable(error: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            error: error.into(),
        }
    }

    /// A failure that must not be retried (dead-letters immediately).
    pub fn permanent(error: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: ErrorKind::NonRetryable,
            error: error.into(),
        }
    }
}

impl From<anyhow::Error> for JobFailure {
    fn from(error: anyhow::Error) -> Self {
        Self::retryable(error)
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.error)
    }
}

/// Processes claimed jobs of one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ClaimedJob) -> Result<(), JobFailure>;
}

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    pub queue: String,
    /// Jobs run at the same time
    pub concurrency: usize,
    /// How long to wait when no jobs are available (max)
    pub max_poll_interval: Duration,
    /// Minimum poll interval
    pub min_poll_interval: Duration,
    /// How often to send heartbeats for running jobs
    pub heartbeat_interval: Duration,
    /// How long in-flight jobs may finish after shutdown is requested
    pub shutdown_grace: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl JobWorkerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            concurrency: 1,
            max_poll_interval: Duration::from_secs(5),
            min_poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(20),
            shutdown_grace: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// A job worker that processes jobs from one queue.
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: JobWorkerConfig,
    /// Jobs currently claimed by this worker
    running_jobs: Arc<RwLock<HashMap<Uuid, ClaimedJob>>>,
}

impl JobWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
            running_jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run until `shutdown` is cancelled and in-flight jobs are drained or
    /// released.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let queue_name = self.config.queue.clone();
        info!(
            worker_id = %self.config.worker_id,
            queue = %queue_name,
            concurrency = self.config.concurrency,
            "job worker starting"
        );

        let slots = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }

            let free = slots.available_permits();
            if free == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    joined = tasks.join_next() => {
                        if let Some(joined) = joined {
                            log_join_error(joined);
                        }
                    }
                }
                continue;
            }

            let jobs = match self
                .queue
                .claim(&queue_name, &self.config.worker_id, free as i64)
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(queue = %queue_name, error = %e, "failed to claim jobs");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

            if jobs.is_empty() {
                let interval = self.idle_interval().await;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        log_join_error(joined);
                    }
                }
                continue;
            }

            debug!(queue = %queue_name, count = jobs.len(), "claimed jobs");

            for job in jobs {
                let permit = slots.clone().acquire_owned().await?;
                self.running_jobs.write().await.insert(job.id, job.clone());

                let queue = self.queue.clone();
                let handler = self.handler.clone();
                let running = self.running_jobs.clone();
                let heartbeat_interval = self.config.heartbeat_interval;
                tasks.spawn(async move {
                    process_job(queue, handler, job, heartbeat_interval, running).await;
                    drop(permit);
                });
            }
        }

        self.drain(tasks).await;
        info!(worker_id = %self.config.worker_id, queue = %queue_name, "job worker stopped");
        Ok(())
    }

    /// Sleep until the next job is due, bounded by the poll interval.
    async fn idle_interval(&self) -> Duration {
        let next = match self.queue.next_ready_in(&self.config.queue).await {
            Ok(next) => next,
            Err(e) => {
                warn!(queue = %self.config.queue, error = %e, "failed to read next ready time");
                None
            }
        };
        next.unwrap_or(self.config.max_poll_interval)
            .clamp(self.config.min_poll_interval, self.config.max_poll_interval)
    }

    /// Wait for in-flight jobs up to the grace period, then abort the rest
    /// and release them back to the queue.
    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        info!(
            queue = %self.config.queue,
            count = tasks.len(),
            grace_secs = self.config.shutdown_grace.as_secs(),
            "waiting for running jobs to complete"
        );

        let deadline = tokio::time::sleep(self.config.shutdown_grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => log_join_error(joined),
                    None => return,
                },
                _ = &mut deadline => break,
            }
        }

        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    error!(error = %e, "job task failed during shutdown");
                }
            }
        }

        let abandoned: Vec<ClaimedJob> = self
            .running_jobs
            .write()
            .await
            .drain()
            .map(|(_, job)| job)
            .collect();
        for job in abandoned {
            let job_id = job.id;
            match self
                .queue
                .mark_failed(
                    &job,
                    "worker shut down before the job finished",
                    None,
                    ErrorKind::Shutdown,
                )
                .await
            {
                Ok(FailureOutcome::LeaseLost) => {
                    debug!(job_id = %job_id, "abandoned job already taken over")
                }
                Ok(_) => warn!(job_id = %job_id, queue = %self.config.queue, "job released on shutdown"),
                Err(e) => error!(job_id = %job_id, error = %e, "failed to release job"),
            }
        }
    }
}

/// Process a single claimed job.
async fn process_job(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    job: ClaimedJob,
    heartbeat_interval: Duration,
    running: Arc<RwLock<HashMap<Uuid, ClaimedJob>>>,
) {
    let job_id = job.id;
    let queue_name = job.queue().to_string();
    let attempt = job.attempt();

    // Stops the heartbeat even if this task is aborted mid-job
    let heartbeat_cancel = CancellationToken::new();
    let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
    let heartbeat_queue = queue.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        interval.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = heartbeat_cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = heartbeat_queue.heartbeat(job_id).await {
                        warn!(job_id = %job_id, error = %e, "heartbeat failed");
                    }
                }
            }
        }
    });

    let result = AssertUnwindSafe(handler.handle(&job)).catch_unwind().await;

    let failure = match result {
        Ok(Ok(())) => None,
        Ok(Err(failure)) => Some(failure),
        Err(panic) => Some(JobFailure::retryable(anyhow::anyhow!(
            "job handler panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };

    match failure {
        None => {
            debug!(job_id = %job_id, queue = %queue_name, attempt, "job succeeded");
            match queue.mark_succeeded(&job).await {
                Ok(true) => {}
                Ok(false) => warn!(
                    job_id = %job_id,
                    queue = %queue_name,
                    attempt,
                    "job finished after its claim was superseded"
                ),
                Err(e) => error!(job_id = %job_id, error = %e, "failed to mark job as succeeded"),
            }
        }
        Some(failure) => {
            // "outer: inner" so the root cause survives in error_message
            let message = format!("{:#}", failure.error);
            let context = format!("{:?}", failure.error);
            match queue
                .mark_failed(&job, &message, Some(&context), failure.kind)
                .await
            {
                Ok(FailureOutcome::Retrying { retry_at, .. }) => warn!(
                    job_id = %job_id,
                    queue = %queue_name,
                    attempt,
                    %retry_at,
                    error = %message,
                    "job failed, will retry"
                ),
                Ok(FailureOutcome::DeadLettered { attempts }) => error!(
                    job_id = %job_id,
                    queue = %queue_name,
                    attempts,
                    error = %message,
                    "job dead-lettered"
                ),
                Ok(FailureOutcome::Released) => {
                    info!(job_id = %job_id, queue = %queue_name, "job released")
                }
                Ok(FailureOutcome::LeaseLost) => warn!(
                    job_id = %job_id,
                    queue = %queue_name,
                    attempt,
                    error = %message,
                    "job failed after its claim was superseded"
                ),
                Err(e) => error!(job_id = %job_id, error = %e, "failed to mark job as failed"),
            }
        }
    }

    running.write().await.remove(&job_id);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "job task failed");
    }
}
