//! Stage processors - one [`JobHandler`] per pipeline queue.
//!
//! Every processor follows the same shape:
//!
//! ```text
//! decode { lead_id } ──► load lead ──► precondition ──► capability (timeout)
//!                            │              │                 │
//!                         missing         stale          ok ──┴── err
//!                            ▼              ▼             ▼         ▼
//!                          no-op          no-op     commit + next  classify,
//!                                                   stage enqueue  record status,
//!                                                                  re-raise/swallow
//! ```

mod analyze;
mod draft;
mod scrape;

pub use analyze::AnalyzeProcessor;
pub use draft::DraftProcessor;
pub use scrape::ScrapeProcessor;

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::common::LeadId;
use crate::domains::leads::jobs::{LeadJob, StageJob};
use crate::domains::leads::models::{Lead, LeadStatus, Stage};
use crate::domains::leads::store::{CommitOutcome, LeadStoreError};
use crate::kernel::jobs::{ClaimedJob, JobFailure, JobHandler, JobQueueExt};
use crate::kernel::{CapabilityError, FailureClass, ServerDeps};

/// Processor bound to each stage's queue.
pub fn handler_for(stage: Stage, deps: ServerDeps) -> Arc<dyn JobHandler> {
    match stage {
        Stage::Scrape => Arc::new(ScrapeProcessor::new(deps)),
        Stage::Analyze => Arc::new(AnalyzeProcessor::new(deps)),
        Stage::Draft => Arc::new(DraftProcessor::new(deps)),
    }
}

/// Decode the job payload; garbage is never worth retrying.
fn decode(job: &ClaimedJob) -> Result<LeadJob, JobFailure> {
    job.deserialize::<LeadJob>().map_err(JobFailure::permanent)
}

fn store_failure(error: LeadStoreError) -> JobFailure {
    JobFailure::retryable(anyhow::Error::new(error).context("lead store unavailable"))
}

/// Load the lead and check that `stage` may run for it.
///
/// `None` means the job is a no-op: the lead is gone or has moved on. A lead
/// already sitting at this stage's success status gets its next stage
/// re-enqueued, covering a crash between commit and enqueue.
async fn load_runnable_lead(
    deps: &ServerDeps,
    lead_id: LeadId,
    stage: Stage,
) -> Result<Option<Lead>, JobFailure> {
    let Some(lead) = deps
        .lead_store
        .find_lead(lead_id)
        .await
        .map_err(store_failure)?
    else {
        warn!(lead_id = %lead_id, %stage, "lead not found, skipping job");
        return Ok(None);
    };

    if lead.may_run(stage) {
        if lead.status.is_failure() {
            info!(lead_id = %lead_id, %stage, status = %lead.status, "retrying failed stage");
        }
        return Ok(Some(lead));
    }

    info!(
        lead_id = %lead_id,
        %stage,
        status = %lead.status,
        "stale job, lead no longer admits this stage"
    );
    if lead.status == stage.success_status() {
        enqueue_next(deps, lead_id, stage).await?;
    }
    Ok(None)
}

async fn enqueue_next(deps: &ServerDeps, lead_id: LeadId, stage: Stage) -> Result<(), JobFailure> {
    let Some(next) = stage.next() else {
        return Ok(());
    };

    let result = deps
        .job_queue
        .enqueue_command(&StageJob::new(next, lead_id))
        .await
        .with_context(|| format!("failed to enqueue {} for lead {}", next, lead_id))?;

    if result.is_created() {
        debug!(lead_id = %lead_id, stage = %next, job_id = %result.job_id(), "enqueued next stage");
    } else {
        debug!(lead_id = %lead_id, stage = %next, job_id = %result.job_id(), "next stage already queued");
    }
    Ok(())
}

/// Act on a success commit: enqueue the successor or log why nothing was
/// written.
async fn finish(
    deps: &ServerDeps,
    lead_id: LeadId,
    stage: Stage,
    outcome: CommitOutcome,
) -> Result<(), JobFailure> {
    match outcome {
        CommitOutcome::Committed => {
            info!(lead_id = %lead_id, %stage, status = %stage.success_status(), "stage committed");
            enqueue_next(deps, lead_id, stage).await
        }
        CommitOutcome::Stale { status } => {
            info!(lead_id = %lead_id, %stage, %status, "lost commit race, result discarded");
            Ok(())
        }
        CommitOutcome::Missing => {
            warn!(lead_id = %lead_id, %stage, "lead deleted mid-stage, result discarded");
            Ok(())
        }
    }
}

/// Lead status written for a failed capability call.
pub fn failure_status(error: &CapabilityError) -> LeadStatus {
    match error.classification() {
        FailureClass::SafetyBlocked => LeadStatus::BlockedBySafety,
        FailureClass::RateLimited => LeadStatus::RateLimited,
        FailureClass::Transient | FailureClass::Generic => LeadStatus::Failed,
    }
}

/// A store error after the lead was admitted: mark the lead failed so it
/// does not sit at its old status, then re-raise to the queue.
///
/// The status write is best effort; the store may well be down for it too.
async fn fail_store(
    deps: &ServerDeps,
    lead: &Lead,
    stage: Stage,
    error: LeadStoreError,
) -> JobFailure {
    match deps
        .lead_store
        .record_failure(lead.id, stage, LeadStatus::Failed)
        .await
    {
        Ok(outcome) => debug!(lead_id = %lead.id, %stage, ?outcome, "recorded store failure on lead"),
        Err(e) => warn!(lead_id = %lead.id, %stage, error = %e, "could not record failure status"),
    }

    warn!(lead_id = %lead.id, domain = %lead.domain, %stage, error = %error, "stage failed on lead store");
    JobFailure::retryable(
        anyhow::Error::new(error)
            .context("lead store unavailable")
            .context(format!("{} failed for {}", stage, lead.domain)),
    )
}

/// Record the failure on the lead, then re-raise it to the queue or swallow
/// it when retrying cannot help.
async fn fail(
    deps: &ServerDeps,
    lead: &Lead,
    stage: Stage,
    error: CapabilityError,
) -> Result<(), JobFailure> {
    let status = failure_status(&error);
    let outcome = deps
        .lead_store
        .record_failure(lead.id, stage, status)
        .await
        .map_err(store_failure)?;

    if outcome != CommitOutcome::Committed {
        info!(lead_id = %lead.id, %stage, ?outcome, error = %error, "failure on stale job ignored");
        return Ok(());
    }

    if status == LeadStatus::BlockedBySafety {
        warn!(lead_id = %lead.id, domain = %lead.domain, %stage, error = %error, "blocked by content policy");
        return Ok(());
    }

    warn!(lead_id = %lead.id, domain = %lead.domain, %stage, %status, error = %error, "stage failed");
    Err(JobFailure::retryable(
        anyhow::Error::new(error).context(format!("{} failed for {}", stage, lead.domain)),
    ))
}
