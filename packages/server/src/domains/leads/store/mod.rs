//! Lead store - the authoritative record of lead status and stage outputs.
//!
//! Every success commit inserts the stage's output row and advances the
//! status in one transaction, re-checking the stage precondition under a
//! lock on the lead. Failure writes are guarded by the same precondition, so
//! a stale attempt can never move a lead backwards.

mod memory;
mod postgres;

pub use memory::InMemoryLeadStore;
pub use postgres::PostgresLeadStore;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::common::LeadId;
use crate::domains::leads::models::{
    AnalysisReport, DraftListing, DraftStatus, EmailDraft, Lead, LeadStatus, ScrapedData, Stage,
};
use crate::kernel::{AnalysisResult, DraftResult, ScrapeResult};

#[derive(Debug, Error)]
pub enum LeadStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, LeadStoreError>;

/// Result of a guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The lead no longer admits this stage; nothing was written
    Stale { status: LeadStatus },
    /// The lead does not exist
    Missing,
}

/// A lead with every row it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadDetail {
    #[serde(flatten)]
    pub lead: Lead,
    pub scraped_data: Option<ScrapedData>,
    /// Newest first
    pub analysis_reports: Vec<AnalysisReport>,
    /// Newest first
    pub email_drafts: Vec<EmailDraft>,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Return the lead for `domain`, creating it as NEW if absent.
    ///
    /// The flag is true when this call created the lead.
    async fn create_or_find_lead(&self, domain: &str) -> StoreResult<(Lead, bool)>;

    async fn find_lead(&self, id: LeadId) -> StoreResult<Option<Lead>>;

    async fn find_lead_by_domain(&self, domain: &str) -> StoreResult<Option<Lead>>;

    async fn scraped_data(&self, lead_id: LeadId) -> StoreResult<Option<ScrapedData>>;

    async fn latest_analysis(&self, lead_id: LeadId) -> StoreResult<Option<AnalysisReport>>;

    /// Insert ScrapedData and advance to SCRAPED.
    async fn commit_scrape(
        &self,
        lead_id: LeadId,
        result: &ScrapeResult,
    ) -> StoreResult<CommitOutcome>;

    /// Insert an AnalysisReport and advance to ANALYZED.
    async fn commit_analysis(
        &self,
        lead_id: LeadId,
        result: &AnalysisResult,
    ) -> StoreResult<CommitOutcome>;

    /// Insert an EmailDraft (pending review) and advance to DRAFTED.
    async fn commit_draft(
        &self,
        lead_id: LeadId,
        result: &DraftResult,
    ) -> StoreResult<CommitOutcome>;

    /// Record that `stage` failed with `status`, if the stage may still run.
    async fn record_failure(
        &self,
        lead_id: LeadId,
        stage: Stage,
        status: LeadStatus,
    ) -> StoreResult<CommitOutcome>;

    async fn lead_detail(&self, id: LeadId) -> StoreResult<Option<LeadDetail>>;

    /// Drafts newest first with their lead's domain.
    async fn list_drafts(&self, status: Option<DraftStatus>) -> StoreResult<Vec<DraftListing>>;

    /// Delete a lead and everything it owns. Returns false if absent.
    async fn delete_lead(&self, domain: &str) -> StoreResult<bool>;

    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> StoreResult<()>;
}

/// Decide a guarded write against the lead's current state.
pub(crate) fn guard(lead: Option<&Lead>, stage: Stage) -> CommitOutcome {
    match lead {
        None => CommitOutcome::Missing,
        Some(lead) if lead.may_run(stage) => CommitOutcome::Committed,
        Some(lead) => CommitOutcome::Stale {
            status: lead.status,
        },
    }
}
