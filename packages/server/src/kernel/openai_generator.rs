//! OpenAI-backed generator: business analysis and outreach copy via
//! schema-constrained structured output.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use openai_client::{OpenAIClient, OpenAIError};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    AnalysisRequest, AnalysisResult, BaseGenerator, CapabilityError, DraftRequest, DraftResult,
};

/// Version tag stored on every draft produced by these prompts.
pub const TEMPLATE_VERSION: &str = "v1.0";

const ANALYST_PROMPT: &str = "You are an expert business analyst and sales strategist. \
Analyze the company data scraped from its website and identify:
1. The business model (B2B, B2C, SaaS, Agency, ...).
2. 3-5 pain points the company is likely facing, based on its public presence.
3. 3-5 specific ways an AI automation agency (chatbots, workflow automation, AI agents) could help.
4. An estimated revenue range (e.g. \"$1M - $5M/yr\") from team size or other signals, or \"Unknown\".";

const COPYWRITER_PROMPT: &str = "You are a world-class copywriter specializing in cold outreach. \
Using the company analysis, write a personalized cold email to the decision-maker. \
The goal is to book a 15-minute discovery call about how AI automation solves their specific pain points.

Guidelines:
- Keep the body under 150 words.
- Conversational but professional.
- Focus on their problems and the value, not a feature list.
- End with a low-friction call to action.
- Subject line: catchy, relevant, under 50 characters.";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalysisOutput {
    pub business_model: String,
    pub pain_points: Vec<String>,
    pub suggested_solutions: Vec<String>,
    pub revenue_estimate: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DraftOutput {
    pub subject_line: String,
    /// Plain text or simple markdown
    pub body_text: String,
}

pub struct OpenAiGenerator {
    client: OpenAIClient,
    model: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = OpenAIClient::new(api_key)
            .with_timeout(timeout)
            .context("Failed to create OpenAI client")?;
        Ok(Self {
            client,
            model: model.into(),
            timeout,
        })
    }

    pub fn with_client(client: OpenAIClient, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn map_error(&self, error: OpenAIError) -> CapabilityError {
        warn!(model = %self.model, error = %error, "generation failed");
        match error {
            OpenAIError::RateLimited(message) => CapabilityError::RateLimited(message),
            OpenAIError::ContentPolicy(message) => CapabilityError::SafetyBlocked(message),
            OpenAIError::Timeout => CapabilityError::Timeout(self.timeout),
            other if other.is_transient() => CapabilityError::Fetch(other.to_string()),
            other => CapabilityError::Generation(other.to_string()),
        }
    }
}

pub fn analysis_prompt(request: &AnalysisRequest) -> String {
    let tech_stack = serde_json::to_string(&request.tech_stack).unwrap_or_else(|_| "{}".into());
    format!(
        "Company: {}\n---\nRaw Text: {}\nMeta Description: {}\nTech Stack: {}\n---",
        request.domain,
        request.raw_text,
        request.meta_description.as_deref().unwrap_or("N/A"),
        tech_stack,
    )
}

pub fn draft_prompt(request: &DraftRequest) -> String {
    format!(
        "Company: {}\n---\nBusiness Model: {}\nPain Points: {}\nSuggested Solutions: {}\nRevenue Estimate: {}\n---",
        request.domain,
        request.business_model,
        request.pain_points.join(", "),
        request.suggested_solutions.join(", "),
        request.revenue_estimate.as_deref().unwrap_or("Unknown"),
    )
}

#[async_trait]
impl BaseGenerator for OpenAiGenerator {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, CapabilityError> {
        let output: AnalysisOutput = self
            .client
            .extract(&self.model, ANALYST_PROMPT, analysis_prompt(request))
            .await
            .map_err(|e| self.map_error(e))?;

        debug!(domain = %request.domain, business_model = %output.business_model, "analysis generated");

        Ok(AnalysisResult {
            business_model: output.business_model,
            pain_points: output.pain_points,
            suggested_solutions: output.suggested_solutions,
            revenue_estimate: output.revenue_estimate.filter(|r| !r.trim().is_empty()),
            model_id: self.model.clone(),
        })
    }

    async fn draft(&self, request: &DraftRequest) -> Result<DraftResult, CapabilityError> {
        let output: DraftOutput = self
            .client
            .extract(&self.model, COPYWRITER_PROMPT, draft_prompt(request))
            .await
            .map_err(|e| self.map_error(e))?;

        Ok(DraftResult {
            subject_line: output.subject_line,
            body_text: output.body_text,
            template_version: TEMPLATE_VERSION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn generator() -> OpenAiGenerator {
        OpenAiGenerator::with_client(
            OpenAIClient::new("sk-test"),
            "gpt-4o-mini",
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_error_mapping() {
        let g = generator();
        assert!(matches!(
            g.map_error(OpenAIError::from_status(429, "slow down")),
            CapabilityError::RateLimited(_)
        ));
        assert!(matches!(
            g.map_error(OpenAIError::ContentPolicy("refused".into())),
            CapabilityError::SafetyBlocked(_)
        ));
        assert!(matches!(
            g.map_error(OpenAIError::Timeout),
            CapabilityError::Timeout(d) if d == Duration::from_secs(60)
        ));
        assert!(matches!(
            g.map_error(OpenAIError::Api { status: 503, message: "down".into() }),
            CapabilityError::Fetch(_)
        ));
        assert!(matches!(
            g.map_error(OpenAIError::Parse("bad json".into())),
            CapabilityError::Generation(_)
        ));
    }

    #[test]
    fn test_analysis_prompt_defaults_missing_meta() {
        let mut tech_stack = BTreeMap::new();
        tech_stack.insert("CMS".to_string(), "WordPress".to_string());
        let prompt = analysis_prompt(&AnalysisRequest {
            domain: "example.com".into(),
            raw_text: "Hello".into(),
            meta_description: None,
            tech_stack,
        });
        assert!(prompt.contains("Meta Description: N/A"));
        assert!(prompt.contains(r#"Tech Stack: {"CMS":"WordPress"}"#));
    }

    #[test]
    fn test_draft_prompt_lists_pain_points() {
        let prompt = draft_prompt(&DraftRequest {
            domain: "example.com".into(),
            business_model: "SaaS".into(),
            pain_points: vec!["churn".into(), "support load".into()],
            suggested_solutions: vec!["chatbot".into()],
            revenue_estimate: None,
        });
        assert!(prompt.contains("Pain Points: churn, support load"));
        assert!(prompt.contains("Revenue Estimate: Unknown"));
    }
}
