pub mod analysis_report;
pub mod email_draft;
pub mod lead;
pub mod scraped_data;

pub use analysis_report::AnalysisReport;
pub use email_draft::{DraftListing, DraftStatus, EmailDraft};
pub use lead::{Lead, LeadStatus, Stage, stage_may_run};
pub use scraped_data::ScrapedData;
