use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool};

use crate::common::{AnalysisReportId, LeadId};
use crate::kernel::AnalysisResult;

/// AnalysisReport - business profile of a lead; the latest one is authoritative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnalysisReport {
    pub id: AnalysisReportId,
    pub lead_id: LeadId,
    pub business_model: String,
    pub pain_points: Json<Vec<String>>,
    pub suggested_solutions: Json<Vec<String>>,
    pub revenue_estimate: Option<String>,
    pub model_used: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisReport {
    pub fn from_result(lead_id: LeadId, result: &AnalysisResult) -> Self {
        Self {
            id: AnalysisReportId::new(),
            lead_id,
            business_model: result.business_model.clone(),
            pain_points: Json(result.pain_points.clone()),
            suggested_solutions: Json(result.suggested_solutions.clone()),
            revenue_estimate: result.revenue_estimate.clone(),
            model_used: result.model_id.clone(),
            created_at: Utc::now(),
        }
    }

    pub async fn find_latest(lead_id: LeadId, pool: &PgPool) -> Result<Option<Self>> {
        let report = sqlx::query_as::<_, AnalysisReport>(
            r#"
            SELECT * FROM analysis_reports
            WHERE lead_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(lead_id)
        .fetch_optional(pool)
        .await?;
        Ok(report)
    }

    pub async fn find_by_lead(lead_id: LeadId, pool: &PgPool) -> Result<Vec<Self>> {
        let reports = sqlx::query_as::<_, AnalysisReport>(
            "SELECT * FROM analysis_reports WHERE lead_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(lead_id)
        .fetch_all(pool)
        .await?;
        Ok(reports)
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_reports
                (id, lead_id, business_model, pain_points, suggested_solutions,
                 revenue_estimate, model_used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(self.id)
        .bind(self.lead_id)
        .bind(&self.business_model)
        .bind(&self.pain_points)
        .bind(&self.suggested_solutions)
        .bind(&self.revenue_estimate)
        .bind(&self.model_used)
        .bind(self.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }
}
