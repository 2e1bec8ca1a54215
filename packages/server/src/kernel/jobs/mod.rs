//! Job infrastructure for background pipeline work.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`JobQueue`] - Durable queue contract, with [`PostgresJobQueue`] and
//!   [`InMemoryJobQueue`] implementations
//! - [`JobWorker`] - Long-running loop that claims and executes jobs of one queue
//! - [`WorkerHost`] - Runs one worker per bound queue plus retention pruning
//! - [`Job`] - Job model with retry and retention policies
//!
//! # Architecture
//!
//! ```text
//! Processor / API calls queue.enqueue_command(&LeadJob)
//!     │
//!     └─► INSERT into jobs (idempotency-checked)
//!
//! WorkerHost
//!     │
//!     ├─► JobWorker (scraping-queue) ─► ScrapeProcessor
//!     ├─► JobWorker (analysis-queue) ─► AnalyzeProcessor
//!     ├─► JobWorker (drafting-queue) ─► DraftProcessor
//!     └─► maintenance: prune per RetentionPolicy
//! ```
//!
//! Business logic stays in domains; this module only moves jobs.

mod host;
mod job;
mod queue;
pub mod testing;
mod worker;

pub use host::{WorkerHost, shutdown_signal};
pub use job::{
    BackoffPolicy, ErrorKind, Job, JobStatus, KeepJobs, MAX_BACKOFF, QueuePolicy, RetentionPolicy,
};
pub use queue::{
    ClaimedJob, CommandMeta, EnqueueOptions, EnqueueResult, FailureOutcome, JobCounts, JobQueue,
    JobQueueExt, PostgresJobQueue, PruneReport, plan_failure,
};
pub use testing::InMemoryJobQueue;
pub use worker::{JobFailure, JobHandler, JobWorker, JobWorkerConfig};
