//! Leads domain - company domains moving through scrape → analyze → draft

pub mod actions;
pub mod jobs;
pub mod models;
pub mod processors;
pub mod store;

pub use jobs::{ALL_QUEUES, LeadJob, StageJob};
pub use models::{
    AnalysisReport, DraftListing, DraftStatus, EmailDraft, Lead, LeadStatus, ScrapedData, Stage,
};
pub use store::{CommitOutcome, InMemoryLeadStore, LeadDetail, LeadStore, PostgresLeadStore};
