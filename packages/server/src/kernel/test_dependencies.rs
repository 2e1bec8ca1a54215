// TestDependencies - mock capabilities for testing
//
// Provides mock services and in-memory stores that can be injected into
// ServerDeps for tests. Responses are scripted in order; the last scripted response repeats once
// the script runs out, so a single error scripts "always fails".

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::jobs::InMemoryJobQueue;
use super::{
    AnalysisRequest, AnalysisResult, BaseGenerator, BaseScraper, CapabilityError, DraftRequest,
    DraftResult, ScrapeResult, ServerDeps, StageTimeouts,
};
use crate::domains::leads::store::InMemoryLeadStore;

/// Ordered responses where the final one is sticky.
struct Script<T> {
    responses: VecDeque<Result<T, CapabilityError>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            responses: VecDeque::new(),
        }
    }

    fn push(&mut self, response: Result<T, CapabilityError>) {
        self.responses.push_back(response);
    }

    fn next(&mut self) -> Option<Result<T, CapabilityError>> {
        if self.responses.len() > 1 {
            self.responses.pop_front()
        } else {
            self.responses.front().cloned()
        }
    }
}

// =============================================================================
// Mock Scraper
// =============================================================================

pub struct MockScraper {
    script: Arc<Mutex<Script<ScrapeResult>>>,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
    delay: Option<Duration>,
}

impl Default for MockScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScraper {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Respond with a page containing only `raw_text`.
    pub fn with_text(self, raw_text: &str) -> Self {
        self.with_result(ScrapeResult {
            raw_text: raw_text.to_string(),
            ..Default::default()
        })
    }

    pub fn with_result(self, result: ScrapeResult) -> Self {
        self.script.lock().unwrap().push(Ok(result));
        self
    }

    pub fn with_error(self, error: CapabilityError) -> Self {
        self.script.lock().unwrap().push(Err(error));
        self
    }

    /// Sleep this long before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl BaseScraper for MockScraper {
    async fn scrape(&self, domain: &str) -> Result<ScrapeResult, CapabilityError> {
        self.calls
            .lock()
            .unwrap()
            .push((domain.to_string(), Instant::now()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().next();
        next.unwrap_or_else(|| Ok(ScrapeResult::default()))
    }
}

// =============================================================================
// Mock Generator
// =============================================================================

pub struct MockGenerator {
    analyses: Arc<Mutex<Script<AnalysisResult>>>,
    drafts: Arc<Mutex<Script<DraftResult>>>,
    analyze_calls: Arc<Mutex<Vec<(AnalysisRequest, Instant)>>>,
    draft_calls: Arc<Mutex<Vec<(DraftRequest, Instant)>>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            analyses: Arc::new(Mutex::new(Script::new())),
            drafts: Arc::new(Mutex::new(Script::new())),
            analyze_calls: Arc::new(Mutex::new(Vec::new())),
            draft_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Analysis with the given business model and placeholder lists.
    pub fn with_business_model(self, business_model: &str) -> Self {
        self.with_analysis(AnalysisResult {
            business_model: business_model.to_string(),
            pain_points: vec!["Manual lead follow-up".to_string()],
            suggested_solutions: vec!["Automated outreach".to_string()],
            revenue_estimate: None,
            model_id: "mock-model".to_string(),
        })
    }

    pub fn with_analysis(self, analysis: AnalysisResult) -> Self {
        self.analyses.lock().unwrap().push(Ok(analysis));
        self
    }

    pub fn with_analysis_error(self, error: CapabilityError) -> Self {
        self.analyses.lock().unwrap().push(Err(error));
        self
    }

    /// Draft with the given subject line.
    pub fn with_subject(self, subject_line: &str) -> Self {
        self.with_draft(DraftResult {
            subject_line: subject_line.to_string(),
            body_text: "Hi there".to_string(),
            template_version: "v1.0".to_string(),
        })
    }

    pub fn with_draft(self, draft: DraftResult) -> Self {
        self.drafts.lock().unwrap().push(Ok(draft));
        self
    }

    pub fn with_draft_error(self, error: CapabilityError) -> Self {
        self.drafts.lock().unwrap().push(Err(error));
        self
    }

    pub fn analyze_calls(&self) -> Vec<AnalysisRequest> {
        self.analyze_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    pub fn analyze_call_times(&self) -> Vec<Instant> {
        self.analyze_calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn draft_calls(&self) -> Vec<DraftRequest> {
        self.draft_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }
}

#[async_trait]
impl BaseGenerator for MockGenerator {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, CapabilityError> {
        self.analyze_calls
            .lock()
            .unwrap()
            .push((request.clone(), Instant::now()));
        let next = self.analyses.lock().unwrap().next();
        next.unwrap_or_else(|| Err(CapabilityError::Generation("no scripted analysis".into())))
    }

    async fn draft(&self, request: &DraftRequest) -> Result<DraftResult, CapabilityError> {
        self.draft_calls
            .lock()
            .unwrap()
            .push((request.clone(), Instant::now()));
        let next = self.drafts.lock().unwrap().next();
        next.unwrap_or_else(|| Err(CapabilityError::Generation("no scripted draft".into())))
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub job_queue: Arc<InMemoryJobQueue>,
    pub lead_store: Arc<InMemoryLeadStore>,
    pub scraper: Arc<MockScraper>,
    pub generator: Arc<MockGenerator>,
    pub timeouts: StageTimeouts,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            job_queue: Arc::new(InMemoryJobQueue::new()),
            lead_store: Arc::new(InMemoryLeadStore::new()),
            scraper: Arc::new(MockScraper::new()),
            generator: Arc::new(MockGenerator::new()),
            timeouts: StageTimeouts::default(),
        }
    }

    /// Set a mock scraper
    pub fn mock_scraper(mut self, scraper: MockScraper) -> Self {
        self.scraper = Arc::new(scraper);
        self
    }

    /// Set a mock generator
    pub fn mock_generator(mut self, generator: MockGenerator) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    /// Set the job queue (e.g. one with custom policies)
    pub fn with_job_queue(mut self, queue: InMemoryJobQueue) -> Self {
        self.job_queue = Arc::new(queue);
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Wire the mocks into a ServerDeps.
    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps::new(
            self.job_queue.clone(),
            self.lead_store.clone(),
            self.scraper.clone(),
            self.generator.clone(),
            self.timeouts,
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_response_is_sticky() {
        let scraper = MockScraper::new()
            .with_error(CapabilityError::Fetch("down".into()))
            .with_text("Hello");

        assert!(scraper.scrape("a.com").await.is_err());
        assert_eq!(scraper.scrape("a.com").await.unwrap().raw_text, "Hello");
        assert_eq!(scraper.scrape("a.com").await.unwrap().raw_text, "Hello");
        assert_eq!(scraper.call_count(), 3);
    }
}
