use async_trait::async_trait;
use tracing::{info, warn};

use super::{decode, fail, fail_store, finish, load_runnable_lead};
use crate::domains::leads::models::Stage;
use crate::kernel::jobs::{ClaimedJob, JobFailure, JobHandler};
use crate::kernel::{DraftRequest, ServerDeps, with_timeout};

/// Writes an outreach email from the latest analysis report.
pub struct DraftProcessor {
    deps: ServerDeps,
}

impl DraftProcessor {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for DraftProcessor {
    async fn handle(&self, job: &ClaimedJob) -> Result<(), JobFailure> {
        let payload = decode(job)?;
        let deps = &self.deps;

        let Some(lead) = load_runnable_lead(deps, payload.lead_id, Stage::Draft).await? else {
            return Ok(());
        };

        let stored = match deps.lead_store.latest_analysis(lead.id).await {
            Ok(stored) => stored,
            Err(e) => return Err(fail_store(deps, &lead, Stage::Draft, e).await),
        };
        let Some(report) = stored else {
            warn!(lead_id = %lead.id, "no analysis report, skipping draft");
            return Ok(());
        };

        let request = DraftRequest {
            domain: lead.domain.clone(),
            business_model: report.business_model,
            pain_points: report.pain_points.0,
            suggested_solutions: report.suggested_solutions.0,
            revenue_estimate: report.revenue_estimate,
        };

        info!(lead_id = %lead.id, domain = %lead.domain, attempt = job.attempt(), "drafting");

        let draft = match with_timeout(deps.timeouts.generation, deps.generator.draft(&request))
            .await
        {
            Ok(draft) => draft,
            Err(e) => return fail(deps, &lead, Stage::Draft, e).await,
        };

        let outcome = match deps.lead_store.commit_draft(lead.id, &draft).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(fail_store(deps, &lead, Stage::Draft, e).await),
        };
        finish(deps, lead.id, Stage::Draft, outcome).await
    }
}
