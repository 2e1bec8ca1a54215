//! Job model for queued pipeline work.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `next_run_at`, or ready now
    #[default]
    Pending,
    /// Claimed by a worker and holding a lease
    Running,
    Succeeded,
    /// Attempts exhausted or permanently failed; kept for inspection
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_error_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Job was interrupted by graceful shutdown - released without using an attempt
    Shutdown,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }
}

// ============================================================================
// Policies
// ============================================================================

/// Longest delay any backoff policy will produce.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Delay between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(attempt - 1)`
    Exponential { base_ms: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential { base_ms: 5_000 }
    }
}

impl BackoffPolicy {
    /// Delay to wait after `failed_attempt` (1-based) before the next attempt.
    pub fn delay_for(&self, failed_attempt: i32) -> Duration {
        let ms = match *self {
            BackoffPolicy::Fixed { delay_ms } => delay_ms,
            BackoffPolicy::Exponential { base_ms } => {
                let exponent = failed_attempt.saturating_sub(1).clamp(0, 32) as u32;
                base_ms.saturating_mul(1u64 << exponent)
            }
        };
        Duration::from_millis(ms).min(MAX_BACKOFF)
    }
}

/// How long finished jobs of one outcome are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepJobs {
    pub max_age: Duration,
    /// Most recent N kept regardless of age; `None` means age-bounded only.
    pub max_count: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub completed: KeepJobs,
    pub dead_letter: KeepJobs,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed: KeepJobs {
                max_age: Duration::from_secs(24 * 3600),
                max_count: Some(1000),
            },
            dead_letter: KeepJobs {
                max_age: Duration::from_secs(7 * 24 * 3600),
                max_count: None,
            },
        }
    }
}

/// Defaults applied to every job enqueued on a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub max_attempts: i32,
    pub backoff: BackoffPolicy,
    pub retention: RetentionPolicy,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub reference_id: Option<Uuid>,
    pub args: serde_json::Value,
    pub status: JobStatus,

    // Retry policy
    /// Attempts started so far (incremented on claim)
    pub attempt: i32,
    pub max_attempts: i32,
    pub backoff: Json<BackoffPolicy>,
    pub next_run_at: DateTime<Utc>,

    // Lease management
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,

    pub idempotency_key: Option<String>,

    // Error tracking
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Full error chain of the last failure
    pub error_context: Option<String>,
    pub dead_lettered_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending job.
    pub fn new(
        queue: &str,
        args: serde_json::Value,
        max_attempts: i32,
        backoff: BackoffPolicy,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            queue: queue.to_string(),
            reference_id: None,
            args,
            status: JobStatus::Pending,
            attempt: 0,
            max_attempts,
            backoff: Json(backoff),
            next_run_at: now,
            lease_expires_at: None,
            worker_id: None,
            idempotency_key: None,
            error_message: None,
            error_kind: None,
            error_context: None,
            dead_lettered_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Find a job by id.
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(job)
    }

    /// Find a pending or running job holding `key`.
    pub async fn find_active_by_idempotency_key(
        queue: &str,
        key: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM jobs
            WHERE queue = $1
              AND idempotency_key = $2
              AND status IN ('pending', 'running')
            LIMIT 1
            "#,
        )
        .bind(queue)
        .bind(key)
        .fetch_optional(pool)
        .await?;
        Ok(job)
    }

    /// Insert this job.
    ///
    /// Returns `None` when another pending or running job on the same queue
    /// already holds this job's idempotency key.
    pub async fn insert(&self, pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO jobs (
                id, queue, reference_id, args, status, attempt, max_attempts, backoff,
                next_run_at, idempotency_key, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (queue, idempotency_key) WHERE status IN ('pending', 'running')
            DO NOTHING
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.queue)
        .bind(self.reference_id)
        .bind(&self.args)
        .bind(self.status)
        .bind(self.attempt)
        .bind(self.max_attempts)
        .bind(&self.backoff)
        .bind(self.next_run_at)
        .bind(&self.idempotency_key)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_optional(pool)
        .await?;
        Ok(job)
    }

    /// Claim up to `limit` ready jobs on `queue`.
    ///
    /// Ready means pending and due, or running with an expired lease and
    /// attempts left (the previous worker died). Uses `FOR UPDATE SKIP LOCKED`
    /// so concurrent workers never claim the same row.
    pub async fn claim_jobs(
        queue: &str,
        limit: i64,
        worker_id: &str,
        lease_duration_ms: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE queue = $1
                  AND attempt < max_attempts
                  AND (
                      (status = 'pending' AND next_run_at <= NOW())
                      OR (status = 'running' AND lease_expires_at < NOW())
                  )
                ORDER BY next_run_at, created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET
                status = 'running',
                attempt = attempt + 1,
                lease_expires_at = NOW() + ($3 || ' milliseconds')::INTERVAL,
                worker_id = $4,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(limit)
        .bind(lease_duration_ms.to_string())
        .bind(worker_id)
        .fetch_all(pool)
        .await?;

        // RETURNING does not preserve the CTE order
        let mut jobs = jobs;
        jobs.sort_by(|a, b| (a.next_run_at, a.created_at).cmp(&(b.next_run_at, b.created_at)));
        Ok(jobs)
    }

    /// Most recent dead-lettered jobs on a queue.
    pub async fn find_dead_letters(queue: &str, limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM jobs
            WHERE queue = $1 AND status = 'dead_letter'
            ORDER BY dead_lettered_at DESC
            LIMIT $2
            "#,
        )
        .bind(queue)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(jobs)
    }

    /// Jobs referencing an entity, newest first.
    pub async fn find_by_reference(reference_id: Uuid, pool: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(
            "SELECT * FROM jobs WHERE reference_id = $1 ORDER BY created_at DESC",
        )
        .bind(reference_id)
        .fetch_all(pool)
        .await?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles_from_base() {
        let backoff = BackoffPolicy::Exponential { base_ms: 5_000 };
        let delays: Vec<u64> = (1..=4).map(|a| backoff.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = BackoffPolicy::Exponential { base_ms: 5_000 };
        assert_eq!(backoff.delay_for(30), MAX_BACKOFF);
        assert_eq!(backoff.delay_for(i32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = BackoffPolicy::Fixed { delay_ms: 250 };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(250));
    }

    #[test]
    fn test_default_queue_policy() {
        let policy = QueuePolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, BackoffPolicy::Exponential { base_ms: 5_000 });
        assert_eq!(policy.retention.completed.max_count, Some(1000));
        assert_eq!(
            policy.retention.dead_letter.max_age,
            Duration::from_secs(7 * 24 * 3600)
        );
    }

    #[test]
    fn test_backoff_serializes_tagged() {
        let json = serde_json::to_value(BackoffPolicy::Exponential { base_ms: 5_000 }).unwrap();
        assert_eq!(json["type"], "exponential");
        assert_eq!(json["base_ms"], 5_000);
    }

    #[test]
    fn test_error_kind_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(ErrorKind::Shutdown.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
    }
}
