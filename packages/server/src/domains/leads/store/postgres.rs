use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::{CommitOutcome, LeadDetail, LeadStore, StoreResult, guard};
use crate::common::LeadId;
use crate::domains::leads::models::{
    AnalysisReport, DraftListing, DraftStatus, EmailDraft, Lead, LeadStatus, ScrapedData, Stage,
};
use crate::kernel::{AnalysisResult, DraftResult, ScrapeResult};

/// Output row written by a successful stage.
enum StageOutput {
    Scrape(ScrapedData),
    Analysis(AnalysisReport),
    Draft(EmailDraft),
}

impl StageOutput {
    fn stage(&self) -> Stage {
        match self {
            StageOutput::Scrape(_) => Stage::Scrape,
            StageOutput::Analysis(_) => Stage::Analyze,
            StageOutput::Draft(_) => Stage::Draft,
        }
    }
}

pub struct PostgresLeadStore {
    pool: PgPool,
}

impl PostgresLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert `output` and advance the lead, all under the lead's row lock.
    async fn commit(&self, lead_id: LeadId, output: StageOutput) -> StoreResult<CommitOutcome> {
        let stage = output.stage();
        let mut tx = self.pool.begin().await?;

        let lead = Lead::lock(lead_id, &mut *tx).await?;
        let outcome = guard(lead.as_ref(), stage);
        if outcome != CommitOutcome::Committed {
            tx.rollback().await?;
            debug!(lead_id = %lead_id, %stage, ?outcome, "commit skipped");
            return Ok(outcome);
        }

        match &output {
            StageOutput::Scrape(data) => data.insert(&mut *tx).await?,
            StageOutput::Analysis(report) => report.insert(&mut *tx).await?,
            StageOutput::Draft(draft) => draft.insert(&mut *tx).await?,
        }
        Lead::set_status(lead_id, stage.success_status(), None, &mut *tx).await?;

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }
}

#[async_trait]
impl LeadStore for PostgresLeadStore {
    async fn create_or_find_lead(&self, domain: &str) -> StoreResult<(Lead, bool)> {
        Ok(Lead::find_or_create(domain, &self.pool).await?)
    }

    async fn find_lead(&self, id: LeadId) -> StoreResult<Option<Lead>> {
        Ok(Lead::find_by_id(id, &self.pool).await?)
    }

    async fn find_lead_by_domain(&self, domain: &str) -> StoreResult<Option<Lead>> {
        Ok(Lead::find_by_domain(domain, &self.pool).await?)
    }

    async fn scraped_data(&self, lead_id: LeadId) -> StoreResult<Option<ScrapedData>> {
        Ok(ScrapedData::find_by_lead(lead_id, &self.pool).await?)
    }

    async fn latest_analysis(&self, lead_id: LeadId) -> StoreResult<Option<AnalysisReport>> {
        Ok(AnalysisReport::find_latest(lead_id, &self.pool).await?)
    }

    async fn commit_scrape(
        &self,
        lead_id: LeadId,
        result: &ScrapeResult,
    ) -> StoreResult<CommitOutcome> {
        let data = ScrapedData::from_result(lead_id, result);
        self.commit(lead_id, StageOutput::Scrape(data)).await
    }

    async fn commit_analysis(
        &self,
        lead_id: LeadId,
        result: &AnalysisResult,
    ) -> StoreResult<CommitOutcome> {
        let report = AnalysisReport::from_result(lead_id, result);
        self.commit(lead_id, StageOutput::Analysis(report)).await
    }

    async fn commit_draft(
        &self,
        lead_id: LeadId,
        result: &DraftResult,
    ) -> StoreResult<CommitOutcome> {
        let draft = EmailDraft::from_result(lead_id, result);
        self.commit(lead_id, StageOutput::Draft(draft)).await
    }

    async fn record_failure(
        &self,
        lead_id: LeadId,
        stage: Stage,
        status: LeadStatus,
    ) -> StoreResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let lead = Lead::lock(lead_id, &mut *tx).await?;
        let outcome = guard(lead.as_ref(), stage);
        if outcome == CommitOutcome::Committed {
            Lead::set_status(lead_id, status, Some(stage), &mut *tx).await?;
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(outcome)
    }

    async fn lead_detail(&self, id: LeadId) -> StoreResult<Option<LeadDetail>> {
        let Some(lead) = Lead::find_by_id(id, &self.pool).await? else {
            return Ok(None);
        };

        Ok(Some(LeadDetail {
            scraped_data: ScrapedData::find_by_lead(id, &self.pool).await?,
            analysis_reports: AnalysisReport::find_by_lead(id, &self.pool).await?,
            email_drafts: EmailDraft::find_by_lead(id, &self.pool).await?,
            lead,
        }))
    }

    async fn list_drafts(&self, status: Option<DraftStatus>) -> StoreResult<Vec<DraftListing>> {
        Ok(EmailDraft::list_with_domain(status, &self.pool).await?)
    }

    async fn delete_lead(&self, domain: &str) -> StoreResult<bool> {
        Ok(Lead::delete_by_domain(domain, &self.pool).await?)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
