//! Lead domain actions - business logic shared by the HTTP routes and the CLI

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::common::LeadId;
use crate::domains::leads::jobs::StageJob;
use crate::domains::leads::models::{Lead, LeadStatus, Stage};
use crate::domains::leads::store::LeadStore;
use crate::kernel::jobs::{EnqueueResult, JobQueue, JobQueueExt};
use crate::kernel::ServerDeps;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidDomains {
    #[error("at least one domain is required")]
    Empty,

    #[error("invalid domain at index {index}: {input:?}")]
    Invalid { index: usize, input: String },
}

/// Normalize submitted domains, dropping repeats but keeping order.
pub fn parse_domains(inputs: &[String]) -> Result<Vec<String>, InvalidDomains> {
    if inputs.is_empty() {
        return Err(InvalidDomains::Empty);
    }

    let mut domains: Vec<String> = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let domain = Lead::normalize_domain(input).ok_or_else(|| InvalidDomains::Invalid {
            index,
            input: input.clone(),
        })?;
        if !domains.contains(&domain) {
            domains.push(domain);
        }
    }
    Ok(domains)
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedLead {
    #[serde(flatten)]
    pub lead: Lead,
    /// False when the domain was already known
    pub created: bool,
    /// Scrape job enqueued for a new lead
    pub job_id: Option<Uuid>,
}

/// Create a NEW lead for each domain and enqueue its scrape.
///
/// Known domains are returned as-is without enqueueing anything.
pub async fn submit_leads(domains: &[String], deps: &ServerDeps) -> Result<Vec<SubmittedLead>> {
    let mut submitted = Vec::with_capacity(domains.len());

    for domain in domains {
        let (lead, created) = deps
            .lead_store
            .create_or_find_lead(domain)
            .await
            .with_context(|| format!("failed to create lead for {}", domain))?;

        let job_id = if created {
            let result = deps
                .job_queue
                .enqueue_command(&StageJob::new(Stage::Scrape, lead.id))
                .await?;
            info!(lead_id = %lead.id, domain = %lead.domain, job_id = %result.job_id(), "lead created");
            Some(result.job_id())
        } else {
            info!(lead_id = %lead.id, domain = %lead.domain, status = %lead.status, "lead already exists");
            None
        };

        submitted.push(SubmittedLead {
            lead,
            created,
            job_id,
        });
    }

    Ok(submitted)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueOutcome {
    NotFound,
    /// Drafted or blocked: no stage left to run
    Finished { status: LeadStatus },
    Enqueued { stage: Stage, result: EnqueueResult },
}

/// Enqueue the stage that would move `lead_id` forward.
///
/// Used to restart a lead whose job was dead-lettered. An active job for the
/// same stage is reported as a duplicate rather than doubled.
pub async fn requeue_lead(
    lead_id: LeadId,
    lead_store: &dyn LeadStore,
    job_queue: &dyn JobQueue,
) -> Result<RequeueOutcome> {
    let Some(lead) = lead_store.find_lead(lead_id).await? else {
        return Ok(RequeueOutcome::NotFound);
    };

    let Some(stage) = lead.pending_stage() else {
        return Ok(RequeueOutcome::Finished {
            status: lead.status,
        });
    };

    let result = job_queue
        .enqueue_command(&StageJob::new(stage, lead.id))
        .await?;
    info!(lead_id = %lead.id, %stage, job_id = %result.job_id(), created = result.is_created(), "lead requeued");

    Ok(RequeueOutcome::Enqueued { stage, result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::leads::jobs::SCRAPING_QUEUE;
    use crate::kernel::TestDependencies;

    #[test]
    fn test_parse_domains() {
        let inputs = vec![
            "https://Example.com/".to_string(),
            "acme.io".to_string(),
            "example.com".to_string(),
        ];
        assert_eq!(
            parse_domains(&inputs).unwrap(),
            vec!["example.com".to_string(), "acme.io".to_string()]
        );

        assert_eq!(parse_domains(&[]), Err(InvalidDomains::Empty));
        assert_eq!(
            parse_domains(&["ok.com".to_string(), "  ".to_string()]),
            Err(InvalidDomains::Invalid {
                index: 1,
                input: "  ".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_submit_enqueues_only_new_leads() {
        let test = TestDependencies::new();
        let deps = test.server_deps();

        let domains = vec!["example.com".to_string()];
        let first = submit_leads(&domains, &deps).await.unwrap();
        assert!(first[0].created);
        assert!(first[0].job_id.is_some());
        assert_eq!(first[0].lead.status, LeadStatus::New);

        let second = submit_leads(&domains, &deps).await.unwrap();
        assert!(!second[0].created);
        assert_eq!(second[0].lead.id, first[0].lead.id);
        assert_eq!(second[0].job_id, None);

        assert_eq!(test.job_queue.len(SCRAPING_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_requeue_dedupes_active_stage() {
        let test = TestDependencies::new();
        let deps = test.server_deps();

        let submitted = submit_leads(&["example.com".to_string()], &deps)
            .await
            .unwrap();
        let lead_id = submitted[0].lead.id;

        let store = deps.lead_store.as_ref();
        let queue = deps.job_queue.as_ref();
        match requeue_lead(lead_id, store, queue).await.unwrap() {
            RequeueOutcome::Enqueued { stage, result } => {
                assert_eq!(stage, Stage::Scrape);
                assert_eq!(result, EnqueueResult::Duplicate(submitted[0].job_id.unwrap()));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(
            requeue_lead(LeadId::new(), store, queue).await.unwrap(),
            RequeueOutcome::NotFound
        );
    }
}
