//! Integration tests for the Postgres lead store.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::TestHarness;
use outreach_core::domains::leads::{
    CommitOutcome, DraftStatus, LeadStatus, LeadStore, PostgresLeadStore, Stage,
};
use outreach_core::kernel::{AnalysisResult, DraftResult, ScrapeResult};
use test_context::test_context;

fn scrape_result() -> ScrapeResult {
    ScrapeResult {
        raw_text: "Acme builds invoicing software".to_string(),
        meta_description: Some("Invoicing for small teams".to_string()),
        social_links: vec!["https://twitter.com/acme".to_string()],
        tech_stack: BTreeMap::from([("CMS".to_string(), "WordPress".to_string())]),
    }
}

fn analysis_result(business_model: &str) -> AnalysisResult {
    AnalysisResult {
        business_model: business_model.to_string(),
        pain_points: vec!["manual invoicing".to_string()],
        suggested_solutions: vec!["automated reminders".to_string()],
        revenue_estimate: Some("$1M-$5M".to_string()),
        model_id: "gpt-4o-mini".to_string(),
    }
}

fn draft_result(subject: &str) -> DraftResult {
    DraftResult {
        subject_line: subject.to_string(),
        body_text: "Hi there".to_string(),
        template_version: "v1".to_string(),
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn create_or_find_is_idempotent_per_domain(ctx: &TestHarness) {
    let store = ctx.lead_store();

    let (lead, created) = store.create_or_find_lead("acme.com").await.unwrap();
    assert!(created);
    assert_eq!(lead.status, LeadStatus::New);
    assert_eq!(lead.failed_stage, None);

    let (again, created) = store.create_or_find_lead("acme.com").await.unwrap();
    assert!(!created);
    assert_eq!(again.id, lead.id);

    let by_domain = store.find_lead_by_domain("acme.com").await.unwrap().unwrap();
    assert_eq!(by_domain.id, lead.id);
    assert!(store.find_lead_by_domain("other.com").await.unwrap().is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn commits_advance_lead_through_stages(ctx: &TestHarness) {
    let store = ctx.lead_store();
    let (lead, _) = store.create_or_find_lead("acme.com").await.unwrap();

    // Out of order: analysis before scrape
    assert_eq!(
        store
            .commit_analysis(lead.id, &analysis_result("SaaS"))
            .await
            .unwrap(),
        CommitOutcome::Stale {
            status: LeadStatus::New
        }
    );

    assert_eq!(
        store.commit_scrape(lead.id, &scrape_result()).await.unwrap(),
        CommitOutcome::Committed
    );
    assert_eq!(
        store
            .commit_analysis(lead.id, &analysis_result("SaaS"))
            .await
            .unwrap(),
        CommitOutcome::Committed
    );
    assert_eq!(
        store
            .commit_draft(lead.id, &draft_result("Quick question"))
            .await
            .unwrap(),
        CommitOutcome::Committed
    );

    let detail = store.lead_detail(lead.id).await.unwrap().unwrap();
    assert_eq!(detail.lead.status, LeadStatus::Drafted);

    let scraped = detail.scraped_data.unwrap();
    assert_eq!(scraped.raw_text, "Acme builds invoicing software");
    assert_eq!(scraped.tech_stack.0.get("CMS").map(String::as_str), Some("WordPress"));

    assert_eq!(detail.analysis_reports.len(), 1);
    assert_eq!(detail.analysis_reports[0].business_model, "SaaS");
    assert_eq!(detail.analysis_reports[0].model_used, "gpt-4o-mini");

    assert_eq!(detail.email_drafts.len(), 1);
    assert_eq!(detail.email_drafts[0].subject_line, "Quick question");
    assert_eq!(detail.email_drafts[0].status, DraftStatus::PendingReview);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn duplicate_commit_is_stale_and_writes_nothing(ctx: &TestHarness) {
    let store = ctx.lead_store();
    let (lead, _) = store.create_or_find_lead("acme.com").await.unwrap();

    store.commit_scrape(lead.id, &scrape_result()).await.unwrap();
    let second = ScrapeResult {
        raw_text: "second".to_string(),
        ..Default::default()
    };
    assert_eq!(
        store.commit_scrape(lead.id, &second).await.unwrap(),
        CommitOutcome::Stale {
            status: LeadStatus::Scraped
        }
    );

    let scraped = store.scraped_data(lead.id).await.unwrap().unwrap();
    assert_eq!(scraped.raw_text, "Acme builds invoicing software");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_commits_admit_exactly_one(ctx: &TestHarness) {
    let store = Arc::new(ctx.lead_store());
    let (lead, _) = store.create_or_find_lead("acme.com").await.unwrap();
    store.commit_scrape(lead.id, &scrape_result()).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..5 {
        let store: Arc<PostgresLeadStore> = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .commit_analysis(lead.id, &analysis_result(&format!("model {}", n)))
                .await
                .unwrap()
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            CommitOutcome::Committed => committed += 1,
            CommitOutcome::Stale { status } => assert_eq!(status, LeadStatus::Analyzed),
            CommitOutcome::Missing => panic!("lead vanished"),
        }
    }
    assert_eq!(committed, 1);

    let detail = store.lead_detail(lead.id).await.unwrap().unwrap();
    assert_eq!(detail.analysis_reports.len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failure_is_recorded_then_cleared_by_success(ctx: &TestHarness) {
    let store = ctx.lead_store();
    let (lead, _) = store.create_or_find_lead("acme.com").await.unwrap();

    assert_eq!(
        store
            .record_failure(lead.id, Stage::Scrape, LeadStatus::Failed)
            .await
            .unwrap(),
        CommitOutcome::Committed
    );
    let failed = store.find_lead(lead.id).await.unwrap().unwrap();
    assert_eq!(failed.status, LeadStatus::Failed);
    assert_eq!(failed.failed_stage, Some(Stage::Scrape));
    assert_eq!(failed.pending_stage(), Some(Stage::Scrape));

    // Another stage may not touch a lead that failed elsewhere
    assert_eq!(
        store
            .record_failure(lead.id, Stage::Analyze, LeadStatus::RateLimited)
            .await
            .unwrap(),
        CommitOutcome::Stale {
            status: LeadStatus::Failed
        }
    );

    assert_eq!(
        store.commit_scrape(lead.id, &scrape_result()).await.unwrap(),
        CommitOutcome::Committed
    );
    let recovered = store.find_lead(lead.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, LeadStatus::Scraped);
    assert_eq!(recovered.failed_stage, None);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn blocked_lead_accepts_no_more_writes(ctx: &TestHarness) {
    let store = ctx.lead_store();
    let (lead, _) = store.create_or_find_lead("acme.com").await.unwrap();
    store.commit_scrape(lead.id, &scrape_result()).await.unwrap();

    store
        .record_failure(lead.id, Stage::Analyze, LeadStatus::BlockedBySafety)
        .await
        .unwrap();

    assert_eq!(
        store
            .commit_analysis(lead.id, &analysis_result("SaaS"))
            .await
            .unwrap(),
        CommitOutcome::Stale {
            status: LeadStatus::BlockedBySafety
        }
    );
    let blocked = store.find_lead(lead.id).await.unwrap().unwrap();
    assert_eq!(blocked.pending_stage(), None);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn writes_to_unknown_lead_report_missing(ctx: &TestHarness) {
    let store = ctx.lead_store();
    let (lead, _) = store.create_or_find_lead("acme.com").await.unwrap();
    assert!(store.delete_lead("acme.com").await.unwrap());

    assert_eq!(
        store.commit_scrape(lead.id, &scrape_result()).await.unwrap(),
        CommitOutcome::Missing
    );
    assert_eq!(
        store
            .record_failure(lead.id, Stage::Scrape, LeadStatus::Failed)
            .await
            .unwrap(),
        CommitOutcome::Missing
    );
    assert!(store.lead_detail(lead.id).await.unwrap().is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn list_drafts_filters_by_status_with_domain(ctx: &TestHarness) {
    let store = ctx.lead_store();
    for domain in ["first.com", "second.com"] {
        let (lead, _) = store.create_or_find_lead(domain).await.unwrap();
        store.commit_scrape(lead.id, &scrape_result()).await.unwrap();
        store
            .commit_analysis(lead.id, &analysis_result("SaaS"))
            .await
            .unwrap();
        store
            .commit_draft(lead.id, &draft_result(&format!("Hello {}", domain)))
            .await
            .unwrap();
    }

    let drafts = store.list_drafts(None).await.unwrap();
    let domains: Vec<&str> = drafts.iter().map(|d| d.domain.as_str()).collect();
    assert_eq!(domains, vec!["second.com", "first.com"]);
    assert_eq!(drafts[0].draft.subject_line, "Hello second.com");

    let pending = store
        .list_drafts(Some(DraftStatus::PendingReview))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert!(store
        .list_drafts(Some(DraftStatus::Approved))
        .await
        .unwrap()
        .is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn delete_lead_cascades_to_outputs(ctx: &TestHarness) {
    let store = ctx.lead_store();
    let (lead, _) = store.create_or_find_lead("acme.com").await.unwrap();
    store.commit_scrape(lead.id, &scrape_result()).await.unwrap();
    store
        .commit_analysis(lead.id, &analysis_result("SaaS"))
        .await
        .unwrap();
    store
        .commit_draft(lead.id, &draft_result("Hello"))
        .await
        .unwrap();

    assert!(store.delete_lead("acme.com").await.unwrap());
    assert!(!store.delete_lead("acme.com").await.unwrap());

    let remaining: i64 = sqlx::query_scalar(
        r#"
        SELECT (SELECT COUNT(*) FROM scraped_data)
             + (SELECT COUNT(*) FROM analysis_reports)
             + (SELECT COUNT(*) FROM email_drafts)
        "#,
    )
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(remaining, 0);
    assert!(store.list_drafts(None).await.unwrap().is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn ping_succeeds(ctx: &TestHarness) {
    ctx.lead_store().ping().await.unwrap();
}
