use async_trait::async_trait;
use tracing::{info, warn};

use super::{decode, fail, fail_store, finish, load_runnable_lead};
use crate::domains::leads::models::Stage;
use crate::kernel::jobs::{ClaimedJob, JobFailure, JobHandler};
use crate::kernel::{AnalysisRequest, ServerDeps, with_timeout};

/// Turns scraped content into an analysis report.
pub struct AnalyzeProcessor {
    deps: ServerDeps,
}

impl AnalyzeProcessor {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for AnalyzeProcessor {
    async fn handle(&self, job: &ClaimedJob) -> Result<(), JobFailure> {
        let payload = decode(job)?;
        let deps = &self.deps;

        let Some(lead) = load_runnable_lead(deps, payload.lead_id, Stage::Analyze).await? else {
            return Ok(());
        };

        let stored = match deps.lead_store.scraped_data(lead.id).await {
            Ok(stored) => stored,
            Err(e) => return Err(fail_store(deps, &lead, Stage::Analyze, e).await),
        };
        let Some(scraped) = stored else {
            warn!(lead_id = %lead.id, "no scraped data, skipping analysis");
            return Ok(());
        };

        let request = AnalysisRequest {
            domain: lead.domain.clone(),
            raw_text: scraped.raw_text,
            meta_description: scraped.meta_description,
            tech_stack: scraped.tech_stack.0,
        };

        info!(lead_id = %lead.id, domain = %lead.domain, attempt = job.attempt(), "analyzing");

        let analysis = match with_timeout(
            deps.timeouts.generation,
            deps.generator.analyze(&request),
        )
        .await
        {
            Ok(analysis) => analysis,
            Err(e) => return fail(deps, &lead, Stage::Analyze, e).await,
        };

        let outcome = match deps.lead_store.commit_analysis(lead.id, &analysis).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(fail_store(deps, &lead, Stage::Analyze, e).await),
        };
        finish(deps, lead.id, Stage::Analyze, outcome).await
    }
}
