use async_trait::async_trait;
use tracing::info;

use super::{decode, fail, fail_store, finish, load_runnable_lead};
use crate::domains::leads::models::Stage;
use crate::kernel::jobs::{ClaimedJob, JobFailure, JobHandler};
use crate::kernel::{ServerDeps, with_timeout};

/// Fetches the lead's homepage and stores the extracted content.
pub struct ScrapeProcessor {
    deps: ServerDeps,
}

impl ScrapeProcessor {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for ScrapeProcessor {
    async fn handle(&self, job: &ClaimedJob) -> Result<(), JobFailure> {
        let payload = decode(job)?;
        let deps = &self.deps;

        let Some(lead) = load_runnable_lead(deps, payload.lead_id, Stage::Scrape).await? else {
            return Ok(());
        };

        info!(lead_id = %lead.id, domain = %lead.domain, attempt = job.attempt(), "scraping");

        let result = match with_timeout(deps.timeouts.scrape, deps.scraper.scrape(&lead.domain)).await
        {
            Ok(result) => result,
            Err(e) => return fail(deps, &lead, Stage::Scrape, e).await,
        };

        let outcome = match deps.lead_store.commit_scrape(lead.id, &result).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(fail_store(deps, &lead, Stage::Scrape, e).await),
        };
        finish(deps, lead.id, Stage::Scrape, outcome).await
    }
}
