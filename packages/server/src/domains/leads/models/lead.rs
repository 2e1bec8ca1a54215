use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};

use crate::common::LeadId;
use crate::domains::leads::jobs::{ANALYSIS_QUEUE, DRAFTING_QUEUE, SCRAPING_QUEUE};

/// Lead - a company domain moving through scrape → analyze → draft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lead {
    pub id: LeadId,
    pub domain: String,
    pub status: LeadStatus,
    /// Stage that set the current failure status; cleared on every success
    pub failed_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pipeline status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lead_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Scraped,
    Analyzed,
    Drafted,
    /// Last attempt failed; retried by the queue until attempts run out
    Failed,
    /// Provider quota hit; retried by the queue
    RateLimited,
    /// Provider refused the content; never retried
    BlockedBySafety,
}

impl LeadStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LeadStatus::Failed | LeadStatus::RateLimited | LeadStatus::BlockedBySafety
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::Scraped => "SCRAPED",
            LeadStatus::Analyzed => "ANALYZED",
            LeadStatus::Drafted => "DRAFTED",
            LeadStatus::Failed => "FAILED",
            LeadStatus::RateLimited => "RATE_LIMITED",
            LeadStatus::BlockedBySafety => "BLOCKED_BY_SAFETY",
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(LeadStatus::New),
            "SCRAPED" => Ok(LeadStatus::Scraped),
            "ANALYZED" => Ok(LeadStatus::Analyzed),
            "DRAFTED" => Ok(LeadStatus::Drafted),
            "FAILED" => Ok(LeadStatus::Failed),
            "RATE_LIMITED" => Ok(LeadStatus::RateLimited),
            "BLOCKED_BY_SAFETY" => Ok(LeadStatus::BlockedBySafety),
            _ => Err(anyhow::anyhow!("Invalid lead status: {}", s)),
        }
    }
}

/// One step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pipeline_stage", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scrape,
    Analyze,
    Draft,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Scrape, Stage::Analyze, Stage::Draft];

    pub fn queue_name(&self) -> &'static str {
        match self {
            Stage::Scrape => SCRAPING_QUEUE,
            Stage::Analyze => ANALYSIS_QUEUE,
            Stage::Draft => DRAFTING_QUEUE,
        }
    }

    pub fn from_queue(queue: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.queue_name() == queue)
    }

    /// Status a lead must hold for this stage to run for the first time.
    pub fn predecessor(&self) -> LeadStatus {
        match self {
            Stage::Scrape => LeadStatus::New,
            Stage::Analyze => LeadStatus::Scraped,
            Stage::Draft => LeadStatus::Analyzed,
        }
    }

    /// Status a lead reaches when this stage commits.
    pub fn success_status(&self) -> LeadStatus {
        match self {
            Stage::Scrape => LeadStatus::Scraped,
            Stage::Analyze => LeadStatus::Analyzed,
            Stage::Draft => LeadStatus::Drafted,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Scrape => Some(Stage::Analyze),
            Stage::Analyze => Some(Stage::Draft),
            Stage::Draft => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Scrape => write!(f, "scrape"),
            Stage::Analyze => write!(f, "analyze"),
            Stage::Draft => write!(f, "draft"),
        }
    }
}

/// Whether `stage` may run for a lead in `status`.
///
/// Either the lead sits at the stage's predecessor, or the stage itself left
/// a retryable failure behind. Anything else is a stale or duplicate job.
pub fn stage_may_run(status: LeadStatus, failed_stage: Option<Stage>, stage: Stage) -> bool {
    match status {
        LeadStatus::Failed | LeadStatus::RateLimited => failed_stage == Some(stage),
        other => other == stage.predecessor(),
    }
}

impl Lead {
    pub fn may_run(&self, stage: Stage) -> bool {
        stage_may_run(self.status, self.failed_stage, stage)
    }

    /// Stage that would move this lead forward, if any.
    pub fn pending_stage(&self) -> Option<Stage> {
        match self.status {
            LeadStatus::New => Some(Stage::Scrape),
            LeadStatus::Scraped => Some(Stage::Analyze),
            LeadStatus::Analyzed => Some(Stage::Draft),
            LeadStatus::Failed | LeadStatus::RateLimited => self.failed_stage,
            LeadStatus::Drafted | LeadStatus::BlockedBySafety => None,
        }
    }

    /// Normalize user input to a bare lowercase domain.
    pub fn normalize_domain(input: &str) -> Option<String> {
        let trimmed = input.trim();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let host = without_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('.')
            .to_ascii_lowercase();
        (!host.is_empty()).then_some(host)
    }
}

// =============================================================================
// SQL Queries - ALL queries must be in models/
// =============================================================================

impl Lead {
    pub async fn find_by_id(id: LeadId, pool: &PgPool) -> Result<Option<Self>> {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(lead)
    }

    pub async fn find_by_domain(domain: &str, pool: &PgPool) -> Result<Option<Self>> {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE domain = $1")
            .bind(domain)
            .fetch_optional(pool)
            .await?;
        Ok(lead)
    }

    /// Insert a NEW lead unless one already exists for `domain`.
    ///
    /// Returns the lead and whether it was created by this call.
    pub async fn find_or_create(domain: &str, pool: &PgPool) -> Result<(Self, bool)> {
        let created = sqlx::query_as::<_, Lead>(
            r#"
            INSERT INTO leads (id, domain, status)
            VALUES ($1, $2, 'NEW')
            ON CONFLICT (domain) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(LeadId::new())
        .bind(domain)
        .fetch_optional(pool)
        .await?;

        match created {
            Some(lead) => Ok((lead, true)),
            None => {
                let existing = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE domain = $1")
                    .bind(domain)
                    .fetch_one(pool)
                    .await?;
                Ok((existing, false))
            }
        }
    }

    /// Lock the lead row for the rest of the transaction.
    pub async fn lock<'e, E: PgExecutor<'e>>(id: LeadId, executor: E) -> Result<Option<Self>> {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(lead)
    }

    /// Set the status; success statuses clear `failed_stage`.
    pub async fn set_status<'e, E: PgExecutor<'e>>(
        id: LeadId,
        status: LeadStatus,
        failed_stage: Option<Stage>,
        executor: E,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE leads
            SET status = $2, failed_stage = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(failed_stage)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Delete a lead with its scraped data, reports and drafts.
    pub async fn delete_by_domain(domain: &str, pool: &PgPool) -> Result<bool> {
        // Child rows cascade
        let result = sqlx::query("DELETE FROM leads WHERE domain = $1")
            .bind(domain)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_run_requires_predecessor() {
        assert!(stage_may_run(LeadStatus::New, None, Stage::Scrape));
        assert!(stage_may_run(LeadStatus::Scraped, None, Stage::Analyze));
        assert!(stage_may_run(LeadStatus::Analyzed, None, Stage::Draft));

        assert!(!stage_may_run(LeadStatus::Scraped, None, Stage::Scrape));
        assert!(!stage_may_run(LeadStatus::New, None, Stage::Analyze));
        assert!(!stage_may_run(LeadStatus::Drafted, None, Stage::Draft));
    }

    #[test]
    fn test_retry_only_for_failing_stage() {
        assert!(stage_may_run(LeadStatus::Failed, Some(Stage::Analyze), Stage::Analyze));
        assert!(stage_may_run(LeadStatus::RateLimited, Some(Stage::Draft), Stage::Draft));

        assert!(!stage_may_run(LeadStatus::Failed, Some(Stage::Analyze), Stage::Scrape));
        assert!(!stage_may_run(LeadStatus::Failed, None, Stage::Scrape));
    }

    #[test]
    fn test_blocked_is_terminal() {
        for stage in Stage::ALL {
            assert!(!stage_may_run(
                LeadStatus::BlockedBySafety,
                Some(stage),
                stage
            ));
        }
    }

    #[test]
    fn test_stage_queues_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_queue(stage.queue_name()), Some(stage));
        }
        assert_eq!(Stage::from_queue("unknown"), None);
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            LeadStatus::New,
            LeadStatus::RateLimited,
            LeadStatus::BlockedBySafety,
        ] {
            assert_eq!(status.to_string().parse::<LeadStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_value(LeadStatus::BlockedBySafety).unwrap(),
            "BLOCKED_BY_SAFETY"
        );
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(
            Lead::normalize_domain(" https://Example.com/about?x=1 "),
            Some("example.com".to_string())
        );
        assert_eq!(Lead::normalize_domain("acme.io"), Some("acme.io".to_string()));
        assert_eq!(Lead::normalize_domain("   "), None);
        assert_eq!(Lead::normalize_domain("https://"), None);
    }
}
