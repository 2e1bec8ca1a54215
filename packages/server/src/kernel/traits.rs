// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Stage processors in domains/leads call these and decide what a failure
// means for the lead.
//
// Naming convention: Base* for trait names (e.g., BaseScraper, BaseGenerator)

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Capability errors
// =============================================================================

/// How a capability failure should be treated by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network, timeout, upstream 5xx. Worth retrying.
    Transient,
    /// Provider quota or rate limit. Worth retrying after backoff.
    RateLimited,
    /// Provider refused the content. Never retried.
    SafetyBlocked,
    /// Anything else. Retried under the queue's policy.
    Generic,
}

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("blocked by content policy: {0}")]
    SafetyBlocked(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

impl CapabilityError {
    pub fn classification(&self) -> FailureClass {
        match self {
            CapabilityError::Fetch(_) | CapabilityError::Timeout(_) => FailureClass::Transient,
            CapabilityError::RateLimited(_) => FailureClass::RateLimited,
            CapabilityError::SafetyBlocked(_) => FailureClass::SafetyBlocked,
            CapabilityError::Generation(_) => FailureClass::Generic,
        }
    }
}

// =============================================================================
// Web Scraper Trait
// =============================================================================

/// Content extracted from a lead's homepage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub raw_text: String,
    pub meta_description: Option<String>,
    /// De-duplicated, first-seen order
    pub social_links: Vec<String>,
    /// Category -> detected technology, e.g. "CMS" -> "WordPress"
    pub tech_stack: BTreeMap<String, String>,
}

#[async_trait]
pub trait BaseScraper: Send + Sync {
    /// Fetch and extract the homepage of `domain`.
    async fn scrape(&self, domain: &str) -> Result<ScrapeResult, CapabilityError>;
}

// =============================================================================
// Generator Trait (analysis + copywriting)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    pub domain: String,
    pub raw_text: String,
    pub meta_description: Option<String>,
    pub tech_stack: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub business_model: String,
    pub pain_points: Vec<String>,
    pub suggested_solutions: Vec<String>,
    pub revenue_estimate: Option<String>,
    /// Model that produced the analysis
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftRequest {
    pub domain: String,
    pub business_model: String,
    pub pain_points: Vec<String>,
    pub suggested_solutions: Vec<String>,
    pub revenue_estimate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftResult {
    pub subject_line: String,
    pub body_text: String,
    pub template_version: String,
}

#[async_trait]
pub trait BaseGenerator: Send + Sync {
    /// Analyze scraped content into a business profile.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, CapabilityError>;

    /// Write an outreach email from an analysis.
    async fn draft(&self, request: &DraftRequest) -> Result<DraftResult, CapabilityError>;
}

/// Bound a capability call by `limit`, mapping expiry to
/// [`CapabilityError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, CapabilityError>
where
    F: std::future::Future<Output = Result<T, CapabilityError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            CapabilityError::Timeout(Duration::from_secs(1)).classification(),
            FailureClass::Transient
        );
        assert_eq!(
            CapabilityError::RateLimited("429".into()).classification(),
            FailureClass::RateLimited
        );
        assert_eq!(
            CapabilityError::SafetyBlocked("refused".into()).classification(),
            FailureClass::SafetyBlocked
        );
        assert_eq!(
            CapabilityError::Generation("bad json".into()).classification(),
            FailureClass::Generic
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(30), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CapabilityError::Timeout(d)) if d == Duration::from_secs(30)));
    }
}
