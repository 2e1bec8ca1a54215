//! Typed ID definitions for pipeline entities.

pub use super::id::Id;

/// Marker type for Lead entities.
pub struct Lead;

/// Marker type for ScrapedData rows.
pub struct ScrapedData;

/// Marker type for AnalysisReport rows.
pub struct AnalysisReport;

/// Marker type for EmailDraft rows.
pub struct EmailDraft;

pub type LeadId = Id<Lead>;
pub type ScrapedDataId = Id<ScrapedData>;
pub type AnalysisReportId = Id<AnalysisReport>;
pub type EmailDraftId = Id<EmailDraft>;
