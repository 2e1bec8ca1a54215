use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{CommitOutcome, LeadDetail, LeadStore, StoreResult, guard};
use crate::common::LeadId;
use crate::domains::leads::models::{
    AnalysisReport, DraftListing, DraftStatus, EmailDraft, Lead, LeadStatus, ScrapedData, Stage,
};
use crate::kernel::{AnalysisResult, DraftResult, ScrapeResult};

#[derive(Default)]
struct State {
    leads: HashMap<LeadId, Lead>,
    scraped: HashMap<LeadId, ScrapedData>,
    /// Insertion order, oldest first
    analyses: Vec<AnalysisReport>,
    drafts: Vec<EmailDraft>,
}

impl State {
    fn advance(&mut self, lead_id: LeadId, status: LeadStatus, failed_stage: Option<Stage>) {
        if let Some(lead) = self.leads.get_mut(&lead_id) {
            lead.status = status;
            lead.failed_stage = failed_stage;
            lead.updated_at = Utc::now();
        }
    }
}

/// Lead store held in process memory, for tests and local runs.
///
/// A single mutex stands in for the row lock, so every guarded write is
/// atomic with its precondition check.
#[derive(Default)]
pub struct InMemoryLeadStore {
    state: Mutex<State>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn commit_with(
        &self,
        lead_id: LeadId,
        stage: Stage,
        write: impl FnOnce(&mut State),
    ) -> CommitOutcome {
        let mut state = self.state.lock().unwrap();
        let outcome = guard(state.leads.get(&lead_id), stage);
        if outcome == CommitOutcome::Committed {
            write(&mut state);
            state.advance(lead_id, stage.success_status(), None);
        }
        outcome
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn create_or_find_lead(&self, domain: &str) -> StoreResult<(Lead, bool)> {
        let mut state = self.state.lock().unwrap();
        if let Some(lead) = state.leads.values().find(|l| l.domain == domain) {
            return Ok((lead.clone(), false));
        }

        let now = Utc::now();
        let lead = Lead {
            id: LeadId::new(),
            domain: domain.to_string(),
            status: LeadStatus::New,
            failed_stage: None,
            created_at: now,
            updated_at: now,
        };
        state.leads.insert(lead.id, lead.clone());
        Ok((lead, true))
    }

    async fn find_lead(&self, id: LeadId) -> StoreResult<Option<Lead>> {
        Ok(self.state.lock().unwrap().leads.get(&id).cloned())
    }

    async fn find_lead_by_domain(&self, domain: &str) -> StoreResult<Option<Lead>> {
        let state = self.state.lock().unwrap();
        Ok(state.leads.values().find(|l| l.domain == domain).cloned())
    }

    async fn scraped_data(&self, lead_id: LeadId) -> StoreResult<Option<ScrapedData>> {
        Ok(self.state.lock().unwrap().scraped.get(&lead_id).cloned())
    }

    async fn latest_analysis(&self, lead_id: LeadId) -> StoreResult<Option<AnalysisReport>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .analyses
            .iter()
            .rev()
            .find(|r| r.lead_id == lead_id)
            .cloned())
    }

    async fn commit_scrape(
        &self,
        lead_id: LeadId,
        result: &ScrapeResult,
    ) -> StoreResult<CommitOutcome> {
        let data = ScrapedData::from_result(lead_id, result);
        Ok(self.commit_with(lead_id, Stage::Scrape, |state| {
            state.scraped.insert(lead_id, data);
        }))
    }

    async fn commit_analysis(
        &self,
        lead_id: LeadId,
        result: &AnalysisResult,
    ) -> StoreResult<CommitOutcome> {
        let report = AnalysisReport::from_result(lead_id, result);
        Ok(self.commit_with(lead_id, Stage::Analyze, |state| {
            state.analyses.push(report);
        }))
    }

    async fn commit_draft(
        &self,
        lead_id: LeadId,
        result: &DraftResult,
    ) -> StoreResult<CommitOutcome> {
        let draft = EmailDraft::from_result(lead_id, result);
        Ok(self.commit_with(lead_id, Stage::Draft, |state| {
            state.drafts.push(draft);
        }))
    }

    async fn record_failure(
        &self,
        lead_id: LeadId,
        stage: Stage,
        status: LeadStatus,
    ) -> StoreResult<CommitOutcome> {
        let mut state = self.state.lock().unwrap();
        let outcome = guard(state.leads.get(&lead_id), stage);
        if outcome == CommitOutcome::Committed {
            state.advance(lead_id, status, Some(stage));
        }
        Ok(outcome)
    }

    async fn lead_detail(&self, id: LeadId) -> StoreResult<Option<LeadDetail>> {
        let state = self.state.lock().unwrap();
        let Some(lead) = state.leads.get(&id).cloned() else {
            return Ok(None);
        };

        Ok(Some(LeadDetail {
            scraped_data: state.scraped.get(&id).cloned(),
            analysis_reports: state
                .analyses
                .iter()
                .rev()
                .filter(|r| r.lead_id == id)
                .cloned()
                .collect(),
            email_drafts: state
                .drafts
                .iter()
                .rev()
                .filter(|d| d.lead_id == id)
                .cloned()
                .collect(),
            lead,
        }))
    }

    async fn list_drafts(&self, status: Option<DraftStatus>) -> StoreResult<Vec<DraftListing>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .drafts
            .iter()
            .rev()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .filter_map(|d| {
                let lead = state.leads.get(&d.lead_id)?;
                Some(DraftListing {
                    draft: d.clone(),
                    domain: lead.domain.clone(),
                })
            })
            .collect())
    }

    async fn delete_lead(&self, domain: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(id) = state.leads.values().find(|l| l.domain == domain).map(|l| l.id) else {
            return Ok(false);
        };

        state.leads.remove(&id);
        state.scraped.remove(&id);
        state.analyses.retain(|r| r.lead_id != id);
        state.drafts.retain(|d| d.lead_id != id);
        Ok(true)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(model: &str) -> AnalysisResult {
        AnalysisResult {
            business_model: model.to_string(),
            pain_points: vec!["slow onboarding".to_string()],
            suggested_solutions: vec!["self-serve trial".to_string()],
            revenue_estimate: None,
            model_id: "test-model".to_string(),
        }
    }

    fn draft(subject: &str) -> DraftResult {
        DraftResult {
            subject_line: subject.to_string(),
            body_text: "Hi there".to_string(),
            template_version: "v1.0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_or_find_is_idempotent() {
        let store = InMemoryLeadStore::new();

        let (first, created) = store.create_or_find_lead("example.com").await.unwrap();
        assert!(created);
        assert_eq!(first.status, LeadStatus::New);

        let (second, created) = store.create_or_find_lead("example.com").await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_commits_advance_in_order() {
        let store = InMemoryLeadStore::new();
        let (lead, _) = store.create_or_find_lead("example.com").await.unwrap();

        // Analysis cannot commit before the scrape
        let early = store.commit_analysis(lead.id, &analysis("SaaS")).await.unwrap();
        assert_eq!(
            early,
            CommitOutcome::Stale {
                status: LeadStatus::New
            }
        );

        let scrape = ScrapeResult {
            raw_text: "Hello".to_string(),
            ..Default::default()
        };
        assert_eq!(
            store.commit_scrape(lead.id, &scrape).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.commit_analysis(lead.id, &analysis("SaaS")).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            store.commit_draft(lead.id, &draft("Quick question")).await.unwrap(),
            CommitOutcome::Committed
        );

        let detail = store.lead_detail(lead.id).await.unwrap().unwrap();
        assert_eq!(detail.lead.status, LeadStatus::Drafted);
        assert_eq!(detail.scraped_data.unwrap().raw_text, "Hello");
        assert_eq!(detail.analysis_reports.len(), 1);
        assert_eq!(detail.email_drafts[0].status, DraftStatus::PendingReview);
    }

    #[tokio::test]
    async fn test_duplicate_commit_is_stale() {
        let store = InMemoryLeadStore::new();
        let (lead, _) = store.create_or_find_lead("example.com").await.unwrap();

        store
            .commit_scrape(lead.id, &ScrapeResult::default())
            .await
            .unwrap();
        let again = store
            .commit_scrape(lead.id, &ScrapeResult::default())
            .await
            .unwrap();
        assert_eq!(
            again,
            CommitOutcome::Stale {
                status: LeadStatus::Scraped
            }
        );
    }

    #[tokio::test]
    async fn test_failure_then_retry_success_clears_failed_stage() {
        let store = InMemoryLeadStore::new();
        let (lead, _) = store.create_or_find_lead("example.com").await.unwrap();

        let outcome = store
            .record_failure(lead.id, Stage::Scrape, LeadStatus::Failed)
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);

        let failed = store.find_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(failed.status, LeadStatus::Failed);
        assert_eq!(failed.failed_stage, Some(Stage::Scrape));

        // Another stage cannot overwrite a failure it does not own
        let foreign = store
            .record_failure(lead.id, Stage::Analyze, LeadStatus::RateLimited)
            .await
            .unwrap();
        assert!(matches!(foreign, CommitOutcome::Stale { .. }));

        store
            .commit_scrape(lead.id, &ScrapeResult::default())
            .await
            .unwrap();
        let recovered = store.find_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, LeadStatus::Scraped);
        assert_eq!(recovered.failed_stage, None);
    }

    #[tokio::test]
    async fn test_missing_lead() {
        let store = InMemoryLeadStore::new();
        let outcome = store
            .commit_scrape(LeadId::new(), &ScrapeResult::default())
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Missing);
    }

    #[tokio::test]
    async fn test_list_drafts_filters_and_delete_cascades() {
        let store = InMemoryLeadStore::new();
        let (lead, _) = store.create_or_find_lead("example.com").await.unwrap();
        store
            .commit_scrape(lead.id, &ScrapeResult::default())
            .await
            .unwrap();
        store.commit_analysis(lead.id, &analysis("SaaS")).await.unwrap();
        store.commit_draft(lead.id, &draft("Hello")).await.unwrap();

        let pending = store
            .list_drafts(Some(DraftStatus::PendingReview))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].domain, "example.com");
        assert!(
            store
                .list_drafts(Some(DraftStatus::Sent))
                .await
                .unwrap()
                .is_empty()
        );

        assert!(store.delete_lead("example.com").await.unwrap());
        assert!(!store.delete_lead("example.com").await.unwrap());
        assert!(store.list_drafts(None).await.unwrap().is_empty());
        assert!(store.latest_analysis(lead.id).await.unwrap().is_none());
    }
}
