use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};

use crate::common::{EmailDraftId, LeadId};
use crate::kernel::DraftResult;

/// EmailDraft - outreach email awaiting human review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailDraft {
    pub id: EmailDraftId,
    pub lead_id: LeadId,
    pub subject_line: String,
    pub body_text: String,
    pub status: DraftStatus,
    pub template_version: String,
    pub created_at: DateTime<Utc>,
}

/// Review status of a draft, independent of the lead's pipeline status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "draft_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    #[default]
    PendingReview,
    Approved,
    Rejected,
    Sent,
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftStatus::PendingReview => write!(f, "pending_review"),
            DraftStatus::Approved => write!(f, "approved"),
            DraftStatus::Rejected => write!(f, "rejected"),
            DraftStatus::Sent => write!(f, "sent"),
        }
    }
}

impl std::str::FromStr for DraftStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending_review" => Ok(DraftStatus::PendingReview),
            "approved" => Ok(DraftStatus::Approved),
            "rejected" => Ok(DraftStatus::Rejected),
            "sent" => Ok(DraftStatus::Sent),
            _ => Err(anyhow::anyhow!("Invalid draft status: {}", s)),
        }
    }
}

/// A draft with the domain of its lead, for review listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DraftListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub draft: EmailDraft,
    pub domain: String,
}

impl EmailDraft {
    pub fn from_result(lead_id: LeadId, result: &DraftResult) -> Self {
        Self {
            id: EmailDraftId::new(),
            lead_id,
            subject_line: result.subject_line.clone(),
            body_text: result.body_text.clone(),
            status: DraftStatus::PendingReview,
            template_version: result.template_version.clone(),
            created_at: Utc::now(),
        }
    }

    pub async fn find_by_lead(lead_id: LeadId, pool: &PgPool) -> Result<Vec<Self>> {
        let drafts = sqlx::query_as::<_, EmailDraft>(
            "SELECT * FROM email_drafts WHERE lead_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(lead_id)
        .fetch_all(pool)
        .await?;
        Ok(drafts)
    }

    /// Drafts newest first, optionally filtered by review status.
    pub async fn list_with_domain(
        status: Option<DraftStatus>,
        pool: &PgPool,
    ) -> Result<Vec<DraftListing>> {
        let drafts = sqlx::query_as::<_, DraftListing>(
            r#"
            SELECT d.*, l.domain
            FROM email_drafts d
            JOIN leads l ON l.id = d.lead_id
            WHERE $1::draft_status IS NULL OR d.status = $1
            ORDER BY d.created_at DESC, d.id DESC
            "#,
        )
        .bind(status)
        .fetch_all(pool)
        .await?;
        Ok(drafts)
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO email_drafts
                (id, lead_id, subject_line, body_text, status, template_version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(self.id)
        .bind(self.lead_id)
        .bind(&self.subject_line)
        .bind(&self.body_text)
        .bind(self.status)
        .bind(&self.template_version)
        .bind(self.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }
}
