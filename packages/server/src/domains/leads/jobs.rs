//! Queue names and the job payload shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::LeadId;
use crate::domains::leads::models::Stage;
use crate::kernel::jobs::CommandMeta;

pub const SCRAPING_QUEUE: &str = "scraping-queue";
pub const ANALYSIS_QUEUE: &str = "analysis-queue";
pub const DRAFTING_QUEUE: &str = "drafting-queue";

pub const ALL_QUEUES: [&str; 3] = [SCRAPING_QUEUE, ANALYSIS_QUEUE, DRAFTING_QUEUE];

/// Payload of a stage job: `{ "lead_id": "..." }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadJob {
    pub lead_id: LeadId,
}

/// A [`LeadJob`] routed to the queue of `stage`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StageJob {
    #[serde(flatten)]
    pub job: LeadJob,
    #[serde(skip)]
    pub stage: Stage,
}

impl StageJob {
    pub fn new(stage: Stage, lead_id: LeadId) -> Self {
        Self {
            job: LeadJob { lead_id },
            stage,
        }
    }
}

impl CommandMeta for StageJob {
    fn queue_name(&self) -> &'static str {
        self.stage.queue_name()
    }

    fn reference_id(&self) -> Option<Uuid> {
        Some(self.job.lead_id.into_uuid())
    }

    /// At most one active job per lead and stage.
    fn idempotency_key(&self) -> Option<String> {
        Some(self.job.lead_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_lead_id_only() {
        let lead_id = LeadId::new();
        let job = StageJob::new(Stage::Analyze, lead_id);
        assert_eq!(
            serde_json::to_value(job).unwrap(),
            serde_json::json!({ "lead_id": lead_id.to_string() })
        );
        assert_eq!(job.queue_name(), ANALYSIS_QUEUE);
        assert_eq!(job.reference_id(), Some(lead_id.into_uuid()));
        assert_eq!(job.idempotency_key(), Some(lead_id.to_string()));
    }

    #[test]
    fn test_payload_decodes() {
        let lead_id = LeadId::new();
        let job: LeadJob =
            serde_json::from_value(serde_json::json!({ "lead_id": lead_id })).unwrap();
        assert_eq!(job.lead_id, lead_id);
    }
}
