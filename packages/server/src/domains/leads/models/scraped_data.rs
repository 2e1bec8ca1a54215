use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool};

use crate::common::{LeadId, ScrapedDataId};
use crate::kernel::ScrapeResult;

/// ScrapedData - homepage content of a lead, written once by the scrape stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScrapedData {
    pub id: ScrapedDataId,
    pub lead_id: LeadId,
    pub raw_text: String,
    pub meta_description: Option<String>,
    pub social_links: Json<Vec<String>>,
    pub tech_stack: Json<BTreeMap<String, String>>,
    pub created_at: DateTime<Utc>,
}

impl ScrapedData {
    pub fn from_result(lead_id: LeadId, result: &ScrapeResult) -> Self {
        Self {
            id: ScrapedDataId::new(),
            lead_id,
            raw_text: result.raw_text.clone(),
            meta_description: result.meta_description.clone(),
            social_links: Json(result.social_links.clone()),
            tech_stack: Json(result.tech_stack.clone()),
            created_at: Utc::now(),
        }
    }

    pub async fn find_by_lead(lead_id: LeadId, pool: &PgPool) -> Result<Option<Self>> {
        let data = sqlx::query_as::<_, ScrapedData>("SELECT * FROM scraped_data WHERE lead_id = $1")
            .bind(lead_id)
            .fetch_optional(pool)
            .await?;
        Ok(data)
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(&self, executor: E) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scraped_data
                (id, lead_id, raw_text, meta_description, social_links, tech_stack, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(self.id)
        .bind(self.lead_id)
        .bind(&self.raw_text)
        .bind(&self.meta_description)
        .bind(&self.social_links)
        .bind(&self.tech_stack)
        .bind(self.created_at)
        .execute(executor)
        .await?;
        Ok(())
    }
}
