//! PostgreSQL-backed job queue implementation.
//!
//! Jobs live in the `jobs` table. Workers claim them with
//! `FOR UPDATE SKIP LOCKED`, hold a lease while running, and report the
//! outcome through [`JobQueue::mark_succeeded`] / [`JobQueue::mark_failed`].

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::job::{BackoffPolicy, ErrorKind, Job, JobStatus, QueuePolicy, RetentionPolicy};

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was enqueued, returns new job ID
    Created(Uuid),
    /// An active job already holds the idempotency key, returns its ID
    Duplicate(Uuid),
}

impl EnqueueResult {
    /// Get the job ID regardless of whether it was created or duplicate
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created job
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Per-job overrides. Anything left unset falls back to the queue policy.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct EnqueueOptions {
    #[builder(default, setter(strip_option))]
    pub max_attempts: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub backoff: Option<BackoffPolicy>,
    /// Earliest time the job may run
    #[builder(default, setter(strip_option))]
    pub run_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub reference_id: Option<Uuid>,
    #[builder(default, setter(strip_option, into))]
    pub idempotency_key: Option<String>,
}

/// A claimed job ready for execution.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The job ID
    pub id: Uuid,
    /// The raw job record, as of the claim
    pub job: Job,
}

impl ClaimedJob {
    pub fn new(job: Job) -> Self {
        Self { id: job.id, job }
    }

    /// Deserialize the job payload.
    pub fn deserialize<C: DeserializeOwned>(&self) -> Result<C> {
        serde_json::from_value(self.job.args.clone())
            .map_err(|e| anyhow!("failed to deserialize payload of job {}: {}", self.id, e))
    }

    pub fn queue(&self) -> &str {
        &self.job.queue
    }

    /// 1-based attempt number of this run.
    pub fn attempt(&self) -> i32 {
        self.job.attempt
    }

    /// Whether a retryable failure of this run would be retried.
    pub fn is_final_attempt(&self) -> bool {
        !self.job.attempts_remaining()
    }

    /// Whether `current` is still this claim: running, same worker, same
    /// attempt. False once the lease expired and another worker took over.
    pub fn holds(&self, current: &Job) -> bool {
        current.status == JobStatus::Running
            && current.worker_id == self.job.worker_id
            && current.attempt == self.job.attempt
    }
}

/// Metadata for typed job payloads.
///
/// Payload structs implement this to route themselves to a queue and
/// optionally deduplicate.
pub trait CommandMeta {
    /// Queue the payload is enqueued on.
    fn queue_name(&self) -> &'static str;

    /// Entity this job works on (shown in operator tooling).
    fn reference_id(&self) -> Option<Uuid> {
        None
    }

    /// Optional idempotency key.
    ///
    /// If provided, ensures only one pending/running job exists with this key.
    fn idempotency_key(&self) -> Option<String> {
        None
    }
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Back to pending; will run again at `retry_at`
    Retrying { attempt: i32, retry_at: DateTime<Utc> },
    /// Attempts exhausted or permanent failure
    DeadLettered { attempts: i32 },
    /// Interrupted by shutdown; pending again with its attempt refunded
    Released,
    /// The claim was superseded (lease expired and reclaimed, or already
    /// finished); nothing was written
    LeaseLost,
}

/// Decide the outcome of a failed attempt.
pub fn plan_failure(job: &Job, kind: ErrorKind, now: DateTime<Utc>) -> FailureOutcome {
    match kind {
        ErrorKind::Shutdown => FailureOutcome::Released,
        ErrorKind::Retryable if job.attempts_remaining() => {
            let delay = job.backoff.0.delay_for(job.attempt);
            let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::hours(1));
            FailureOutcome::Retrying {
                attempt: job.attempt,
                retry_at: now + delay,
            }
        }
        _ => FailureOutcome::DeadLettered {
            attempts: job.attempt,
        },
    }
}

/// Per-queue job counts for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Pending and ready to run
    pub waiting: i64,
    /// Pending with a future `next_run_at` (backing off or scheduled)
    pub delayed: i64,
    pub active: i64,
    pub completed: i64,
    pub dead_letter: i64,
}

/// Rows touched by a prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub completed_removed: u64,
    pub dead_letters_removed: u64,
    /// Running jobs whose lease expired with no attempts left
    pub expired_dead_lettered: u64,
}

/// Trait for job queue operations.
///
/// Object-safe so the worker host and processors can share a
/// `Arc<dyn JobQueue>`; use [`JobQueueExt`] for typed payloads.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Policy applied to jobs on `queue`.
    fn policy(&self, queue: &str) -> QueuePolicy;

    /// Durably enqueue a job and return without waiting for it to run.
    ///
    /// With an idempotency key and a matching pending/running job, returns
    /// `EnqueueResult::Duplicate` with the existing job ID.
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult>;

    /// Claim up to `limit` ready jobs for processing.
    async fn claim(&self, queue: &str, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>>;

    /// Mark a claimed job as successfully completed.
    ///
    /// Returns false without writing if the claim no longer holds the job.
    async fn mark_succeeded(&self, job: &ClaimedJob) -> Result<bool>;

    /// Record a failed attempt of a claimed job.
    ///
    /// Retryable failures with attempts remaining go back to pending after
    /// the job's backoff; everything else is dead-lettered. A superseded
    /// claim writes nothing and yields [`FailureOutcome::LeaseLost`].
    async fn mark_failed(
        &self,
        job: &ClaimedJob,
        error: &str,
        context: Option<&str>,
        kind: ErrorKind,
    ) -> Result<FailureOutcome>;

    /// Extend the lease for a running job (heartbeat).
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;

    /// Time until the next pending job on `queue` becomes ready
    /// (zero if one is ready now, `None` if nothing is pending).
    async fn next_ready_in(&self, queue: &str) -> Result<Option<Duration>>;

    async fn counts(&self, queue: &str) -> Result<JobCounts>;

    /// Fetch a job by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Most recent dead-lettered jobs on `queue`.
    async fn dead_letters(&self, queue: &str, limit: i64) -> Result<Vec<Job>>;

    /// Put a dead-lettered job back on its queue with a fresh attempt budget.
    ///
    /// Returns false if the job does not exist or is not dead-lettered, and
    /// errors if an active job on the queue already holds its idempotency key.
    async fn replay(&self, job_id: Uuid) -> Result<bool>;

    /// Drop finished jobs outside `retention` and dead-letter running jobs
    /// whose lease expired on their final attempt.
    async fn prune(&self, queue: &str, retention: &RetentionPolicy) -> Result<PruneReport>;
}

/// Typed helpers on top of [`JobQueue`].
#[async_trait]
pub trait JobQueueExt: JobQueue {
    /// Serialize and enqueue a typed payload with queue defaults.
    async fn enqueue_command<C>(&self, command: &C) -> Result<EnqueueResult>
    where
        C: Serialize + CommandMeta + Sync,
    {
        let payload = serde_json::to_value(command).context("failed to serialize job payload")?;
        let options = EnqueueOptions {
            reference_id: command.reference_id(),
            idempotency_key: command.idempotency_key(),
            ..Default::default()
        };
        self.enqueue(command.queue_name(), payload, options).await
    }
}

impl<Q: JobQueue + ?Sized> JobQueueExt for Q {}

/// PostgreSQL-backed job queue implementation.
pub struct PostgresJobQueue {
    pool: PgPool,
    policies: HashMap<String, QueuePolicy>,
    default_lease_ms: i64,
}

impl PostgresJobQueue {
    /// Create a new PostgreSQL job queue.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policies: HashMap::new(),
            default_lease_ms: 60_000, // 1 minute
        }
    }

    /// Create with a custom lease duration.
    pub fn with_lease_duration(mut self, lease_ms: i64) -> Self {
        self.default_lease_ms = lease_ms;
        self
    }

    /// Override the policy of one queue.
    pub fn with_policy(mut self, queue: impl Into<String>, policy: QueuePolicy) -> Self {
        self.policies.insert(queue.into(), policy);
        self
    }

    /// Get the default lease duration in milliseconds.
    pub fn default_lease_ms(&self) -> i64 {
        self.default_lease_ms
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    fn policy(&self, queue: &str) -> QueuePolicy {
        self.policies.get(queue).copied().unwrap_or_default()
    }

    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        let policy = self.policy(queue);
        let mut job = Job::new(
            queue,
            payload,
            options.max_attempts.unwrap_or(policy.max_attempts),
            options.backoff.unwrap_or(policy.backoff),
        );
        job.reference_id = options.reference_id;
        job.idempotency_key = options.idempotency_key.clone();
        if let Some(run_at) = options.run_at {
            job.next_run_at = run_at;
        }

        match job.insert(&self.pool).await? {
            Some(created) => {
                info!(job_id = %created.id, queue = %queue, "job enqueued");
                Ok(EnqueueResult::Created(created.id))
            }
            None => {
                let key = options.idempotency_key.unwrap_or_default();
                let existing = Job::find_active_by_idempotency_key(queue, &key, &self.pool)
                    .await?
                    .ok_or_else(|| anyhow!("idempotency conflict on {} without active job", key))?;
                debug!(job_id = %existing.id, queue = %queue, key = %key, "duplicate job");
                Ok(EnqueueResult::Duplicate(existing.id))
            }
        }
    }

    async fn claim(&self, queue: &str, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let jobs =
            Job::claim_jobs(queue, limit, worker_id, self.default_lease_ms, &self.pool).await?;
        Ok(jobs.into_iter().map(ClaimedJob::new).collect())
    }

    async fn mark_succeeded(&self, claimed: &ClaimedJob) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                finished_at = NOW(),
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND worker_id = $2 AND attempt = $3
            "#,
        )
        .bind(claimed.id)
        .bind(&claimed.job.worker_id)
        .bind(claimed.job.attempt)
        .execute(&self.pool)
        .await?;

        let recorded = result.rows_affected() > 0;
        if !recorded {
            warn!(job_id = %claimed.id, "success not recorded: claim no longer holds the job");
        }
        Ok(recorded)
    }

    async fn mark_failed(
        &self,
        claimed: &ClaimedJob,
        error: &str,
        context: Option<&str>,
        kind: ErrorKind,
    ) -> Result<FailureOutcome> {
        let job_id = claimed.id;
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("job {} not found", job_id))?;

        if !claimed.holds(&job) {
            tx.rollback().await?;
            warn!(job_id = %job_id, status = ?job.status, "failure not recorded: claim no longer holds the job");
            return Ok(FailureOutcome::LeaseLost);
        }

        let outcome = plan_failure(&job, kind, Utc::now());
        match outcome {
            FailureOutcome::Released => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        attempt = GREATEST(attempt - 1, 0),
                        next_run_at = NOW(),
                        lease_expires_at = NULL,
                        worker_id = NULL,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'running'
                    "#,
                )
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
            FailureOutcome::Retrying { retry_at, .. } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        next_run_at = $2,
                        lease_expires_at = NULL,
                        worker_id = NULL,
                        error_message = $3,
                        error_context = $4,
                        error_kind = $5,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(job_id)
                .bind(retry_at)
                .bind(error)
                .bind(context)
                .bind(kind)
                .execute(&mut *tx)
                .await?;
            }
            FailureOutcome::LeaseLost => {}
            FailureOutcome::DeadLettered { .. } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'dead_letter',
                        lease_expires_at = NULL,
                        error_message = $2,
                        error_context = $3,
                        error_kind = $4,
                        dead_lettered_at = NOW(),
                        finished_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(job_id)
                .bind(error)
                .bind(context)
                .bind(kind)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(self.default_lease_ms.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn next_ready_in(&self, queue: &str) -> Result<Option<Duration>> {
        let next: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(next_run_at) FROM jobs WHERE queue = $1 AND status = 'pending'",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;

        Ok(next.map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)))
    }

    async fn counts(&self, queue: &str) -> Result<JobCounts> {
        let (waiting, delayed, active, completed, dead_letter): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'pending' AND next_run_at <= NOW()),
                    COUNT(*) FILTER (WHERE status = 'pending' AND next_run_at > NOW()),
                    COUNT(*) FILTER (WHERE status = 'running'),
                    COUNT(*) FILTER (WHERE status = 'succeeded'),
                    COUNT(*) FILTER (WHERE status = 'dead_letter')
                FROM jobs
                WHERE queue = $1
                "#,
            )
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;

        Ok(JobCounts {
            waiting,
            delayed,
            active,
            completed,
            dead_letter,
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn dead_letters(&self, queue: &str, limit: i64) -> Result<Vec<Job>> {
        Job::find_dead_letters(queue, limit, &self.pool).await
    }

    async fn replay(&self, job_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(job) = job.filter(|job| job.status == JobStatus::DeadLetter) else {
            tx.rollback().await?;
            warn!(job_id = %job_id, "replay skipped: job is not dead-lettered");
            return Ok(false);
        };

        if let Some(key) = job.idempotency_key.as_deref() {
            let holder: Option<Uuid> = sqlx::query_scalar(
                r#"
                SELECT id FROM jobs
                WHERE queue = $1
                  AND idempotency_key = $2
                  AND status IN ('pending', 'running')
                LIMIT 1
                "#,
            )
            .bind(&job.queue)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(holder) = holder {
                tx.rollback().await?;
                return Err(replay_conflict(job_id, holder, key));
            }
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempt = 0,
                next_run_at = NOW(),
                lease_expires_at = NULL,
                worker_id = NULL,
                dead_lettered_at = NULL,
                finished_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'dead_letter'
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(job_id = %job_id, "dead-lettered job replayed");
        Ok(true)
    }

    async fn prune(&self, queue: &str, retention: &RetentionPolicy) -> Result<PruneReport> {
        let completed = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE queue = $1
              AND status = 'succeeded'
              AND (
                  finished_at < NOW() - make_interval(secs => $2)
                  OR id NOT IN (
                      SELECT id FROM jobs
                      WHERE queue = $1 AND status = 'succeeded'
                      ORDER BY finished_at DESC
                      LIMIT $3
                  )
              )
            "#,
        )
        .bind(queue)
        .bind(retention.completed.max_age.as_secs_f64())
        .bind(retention.completed.max_count)
        .execute(&self.pool)
        .await?;

        let dead_letters = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE queue = $1
              AND status = 'dead_letter'
              AND (
                  dead_lettered_at < NOW() - make_interval(secs => $2)
                  OR id NOT IN (
                      SELECT id FROM jobs
                      WHERE queue = $1 AND status = 'dead_letter'
                      ORDER BY dead_lettered_at DESC
                      LIMIT $3
                  )
              )
            "#,
        )
        .bind(queue)
        .bind(retention.dead_letter.max_age.as_secs_f64())
        .bind(retention.dead_letter.max_count)
        .execute(&self.pool)
        .await?;

        let expired = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead_letter',
                error_message = 'lease expired on final attempt',
                error_kind = 'retryable',
                lease_expires_at = NULL,
                dead_lettered_at = NOW(),
                finished_at = NOW(),
                updated_at = NOW()
            WHERE queue = $1
              AND status = 'running'
              AND lease_expires_at < NOW()
              AND attempt >= max_attempts
            "#,
        )
        .bind(queue)
        .execute(&self.pool)
        .await?;

        let report = PruneReport {
            completed_removed: completed.rows_affected(),
            dead_letters_removed: dead_letters.rows_affected(),
            expired_dead_lettered: expired.rows_affected(),
        };
        debug!(queue = %queue, ?report, "pruned jobs");
        Ok(report)
    }
}

/// Replaying would put two active jobs behind one idempotency key.
pub(crate) fn replay_conflict(job_id: Uuid, holder: Uuid, key: &str) -> anyhow::Error {
    anyhow!(
        "cannot replay job {}: active job {} already holds idempotency key {}",
        job_id,
        holder,
        key
    )
}

/// True for jobs that still count against a queue's active work.
pub(crate) fn is_active(status: JobStatus) -> bool {
    matches!(status, JobStatus::Pending | JobStatus::Running)
}
