//! In-memory job queue for tests and local runs.
//!
//! Scheduling uses `tokio::time::Instant`, so tests running with paused time
//! (`#[tokio::test(start_paused = true)]`) see backoff delays elapse
//! instantly while preserving their exact lengths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use super::job::{ErrorKind, Job, JobStatus, QueuePolicy, RetentionPolicy};
use super::queue::{
    ClaimedJob, EnqueueOptions, EnqueueResult, FailureOutcome, JobCounts, JobQueue, PruneReport,
    is_active, plan_failure, replay_conflict,
};

struct Entry {
    job: Job,
    seq: u64,
    ready_at: Instant,
    lease_until: Option<Instant>,
    finished_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    entries: HashMap<Uuid, Entry>,
    next_seq: u64,
}

pub struct InMemoryJobQueue {
    state: Mutex<State>,
    policies: HashMap<String, QueuePolicy>,
    lease: Duration,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            policies: HashMap::new(),
            lease: Duration::from_secs(60),
        }
    }

    pub fn with_policy(mut self, queue: impl Into<String>, policy: QueuePolicy) -> Self {
        self.policies.insert(queue.into(), policy);
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Snapshot of every job on `queue`, oldest first.
    pub fn jobs(&self, queue: &str) -> Vec<Job> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<&Entry> = state
            .entries
            .values()
            .filter(|e| e.job.queue == queue)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    /// Total jobs on `queue` in any status.
    pub fn len(&self, queue: &str) -> usize {
        self.jobs(queue).len()
    }

    /// Jobs on `queue` currently in `status`.
    pub fn count(&self, queue: &str, status: JobStatus) -> usize {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .filter(|e| e.job.queue == queue && e.job.status == status)
            .count()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
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
        let mut state = self.state.lock().unwrap();

        if let Some(key) = &options.idempotency_key {
            let existing = state.entries.values().find(|e| {
                e.job.queue == queue
                    && e.job.idempotency_key.as_deref() == Some(key.as_str())
                    && is_active(e.job.status)
            });
            if let Some(existing) = existing {
                return Ok(EnqueueResult::Duplicate(existing.job.id));
            }
        }

        let mut job = Job::new(
            queue,
            payload,
            options.max_attempts.unwrap_or(policy.max_attempts),
            options.backoff.unwrap_or(policy.backoff),
        );
        job.reference_id = options.reference_id;
        job.idempotency_key = options.idempotency_key;

        let now = Instant::now();
        let ready_at = match options.run_at {
            Some(run_at) => {
                job.next_run_at = run_at;
                now + (run_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
            }
            None => now,
        };

        let id = job.id;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            id,
            Entry {
                job,
                seq,
                ready_at,
                lease_until: None,
                finished_at: None,
            },
        );
        Ok(EnqueueResult::Created(id))
    }

    async fn claim(&self, queue: &str, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        let mut ready: Vec<(Instant, u64, Uuid)> = state
            .entries
            .values()
            .filter(|e| e.job.queue == queue && e.job.attempts_remaining())
            .filter(|e| match e.job.status {
                JobStatus::Pending => e.ready_at <= now,
                JobStatus::Running => e.lease_until.is_some_and(|l| l < now),
                _ => false,
            })
            .map(|e| (e.ready_at, e.seq, e.job.id))
            .collect();
        ready.sort();
        ready.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(ready.len());
        for (_, _, id) in ready {
            if let Some(entry) = state.entries.get_mut(&id) {
                entry.job.status = JobStatus::Running;
                entry.job.attempt += 1;
                entry.job.worker_id = Some(worker_id.to_string());
                entry.job.lease_expires_at = chrono::Duration::from_std(self.lease)
                    .ok()
                    .map(|lease| Utc::now() + lease);
                entry.job.updated_at = Utc::now();
                entry.lease_until = Some(now + self.lease);
                claimed.push(ClaimedJob::new(entry.job.clone()));
            }
        }
        Ok(claimed)
    }

    async fn mark_succeeded(&self, claimed: &ClaimedJob) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get_mut(&claimed.id)
            .ok_or_else(|| anyhow!("job {} not found", claimed.id))?;
        if !claimed.holds(&entry.job) {
            return Ok(false);
        }
        entry.job.status = JobStatus::Succeeded;
        entry.job.finished_at = Some(Utc::now());
        entry.job.lease_expires_at = None;
        entry.lease_until = None;
        entry.finished_at = Some(Instant::now());
        Ok(true)
    }

    async fn mark_failed(
        &self,
        claimed: &ClaimedJob,
        error: &str,
        context: Option<&str>,
        kind: ErrorKind,
    ) -> Result<FailureOutcome> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get_mut(&claimed.id)
            .ok_or_else(|| anyhow!("job {} not found", claimed.id))?;
        if !claimed.holds(&entry.job) {
            return Ok(FailureOutcome::LeaseLost);
        }

        let outcome = plan_failure(&entry.job, kind, Utc::now());
        let now = Instant::now();
        entry.lease_until = None;
        entry.job.lease_expires_at = None;
        entry.job.updated_at = Utc::now();

        match outcome {
            FailureOutcome::LeaseLost => {}
            FailureOutcome::Released => {
                entry.job.status = JobStatus::Pending;
                entry.job.attempt = (entry.job.attempt - 1).max(0);
                entry.job.worker_id = None;
                entry.ready_at = now;
            }
            FailureOutcome::Retrying { attempt, retry_at } => {
                entry.job.status = JobStatus::Pending;
                entry.job.next_run_at = retry_at;
                entry.job.worker_id = None;
                entry.ready_at = now + entry.job.backoff.0.delay_for(attempt);
            }
            FailureOutcome::DeadLettered { .. } => {
                entry.job.status = JobStatus::DeadLetter;
                entry.job.dead_lettered_at = Some(Utc::now());
                entry.job.finished_at = Some(Utc::now());
                entry.finished_at = Some(now);
            }
        }

        if kind != ErrorKind::Shutdown {
            entry.job.error_message = Some(error.to_string());
            entry.job.error_context = context.map(str::to_string);
            entry.job.error_kind = Some(kind);
        }
        Ok(outcome)
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(&job_id) {
            if entry.job.status == JobStatus::Running {
                entry.lease_until = Some(Instant::now() + self.lease);
            }
        }
        Ok(())
    }

    async fn next_ready_in(&self, queue: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .values()
            .filter(|e| e.job.queue == queue && e.job.status == JobStatus::Pending)
            .map(|e| e.ready_at.saturating_duration_since(now))
            .min())
    }

    async fn counts(&self, queue: &str) -> Result<JobCounts> {
        let now = Instant::now();
        let state = self.state.lock().unwrap();
        let mut counts = JobCounts::default();
        for entry in state.entries.values().filter(|e| e.job.queue == queue) {
            match entry.job.status {
                JobStatus::Pending if entry.ready_at <= now => counts.waiting += 1,
                JobStatus::Pending => counts.delayed += 1,
                JobStatus::Running => counts.active += 1,
                JobStatus::Succeeded => counts.completed += 1,
                JobStatus::DeadLetter => counts.dead_letter += 1,
            }
        }
        Ok(counts)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let state = self.state.lock().unwrap();
        Ok(state.entries.get(&job_id).map(|e| e.job.clone()))
    }

    async fn dead_letters(&self, queue: &str, limit: i64) -> Result<Vec<Job>> {
        let state = self.state.lock().unwrap();
        let mut dead: Vec<&Entry> = state
            .entries
            .values()
            .filter(|e| e.job.queue == queue && e.job.status == JobStatus::DeadLetter)
            .collect();
        dead.sort_by_key(|e| std::cmp::Reverse(e.finished_at));
        Ok(dead
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|e| e.job.clone())
            .collect())
    }

    async fn replay(&self, job_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(dead) = state
            .entries
            .get(&job_id)
            .filter(|e| e.job.status == JobStatus::DeadLetter)
        else {
            return Ok(false);
        };
        if let Some(key) = dead.job.idempotency_key.as_deref() {
            let holder = state.entries.values().find(|e| {
                e.job.queue == dead.job.queue
                    && e.job.idempotency_key.as_deref() == Some(key)
                    && is_active(e.job.status)
            });
            if let Some(holder) = holder {
                return Err(replay_conflict(job_id, holder.job.id, key));
            }
        }
        match state.entries.get_mut(&job_id) {
            Some(entry) => {
                entry.job.status = JobStatus::Pending;
                entry.job.attempt = 0;
                entry.job.dead_lettered_at = None;
                entry.job.finished_at = None;
                entry.job.next_run_at = Utc::now();
                entry.ready_at = Instant::now();
                entry.finished_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prune(&self, queue: &str, retention: &RetentionPolicy) -> Result<PruneReport> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let mut report = PruneReport::default();

        for (status, keep) in [
            (JobStatus::Succeeded, retention.completed),
            (JobStatus::DeadLetter, retention.dead_letter),
        ] {
            let mut finished: Vec<(Instant, Uuid)> = state
                .entries
                .values()
                .filter(|e| e.job.queue == queue && e.job.status == status)
                .filter_map(|e| e.finished_at.map(|at| (at, e.job.id)))
                .collect();
            // newest first
            finished.sort_by(|a, b| b.0.cmp(&a.0));

            let max_count = keep.max_count.map_or(usize::MAX, |c| c.max(0) as usize);
            let doomed: Vec<Uuid> = finished
                .iter()
                .enumerate()
                .filter(|(i, (at, _))| *i >= max_count || now.duration_since(*at) > keep.max_age)
                .map(|(_, (_, id))| *id)
                .collect();

            for id in &doomed {
                state.entries.remove(id);
            }
            match status {
                JobStatus::Succeeded => report.completed_removed = doomed.len() as u64,
                _ => report.dead_letters_removed = doomed.len() as u64,
            }
        }

        for entry in state.entries.values_mut().filter(|e| e.job.queue == queue) {
            let expired = entry.lease_until.is_some_and(|l| l < now);
            if entry.job.status == JobStatus::Running && expired && !entry.job.attempts_remaining() {
                entry.job.status = JobStatus::DeadLetter;
                entry.job.error_message = Some("lease expired on final attempt".to_string());
                entry.job.dead_lettered_at = Some(Utc::now());
                entry.lease_until = None;
                entry.finished_at = Some(now);
                report.expired_dead_lettered += 1;
            }
        }

        Ok(report)
    }
}
