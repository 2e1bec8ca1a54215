//! Server dependencies for stage processors (using traits for testability)
//!
//! This module provides the central dependency container shared by the
//! processors, the HTTP routes and the operator CLI. Every external service
//! sits behind a trait so tests can swap in in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use crate::domains::leads::store::LeadStore;
use crate::kernel::jobs::JobQueue;
use crate::kernel::{BaseGenerator, BaseScraper};

/// Upper bounds on capability calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub scrape: Duration,
    /// Applies to both analysis and drafting
    pub generation: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            scrape: Duration::from_secs(30),
            generation: Duration::from_secs(60),
        }
    }
}

/// Server dependencies accessible to processors and routes
#[derive(Clone)]
pub struct ServerDeps {
    pub job_queue: Arc<dyn JobQueue>,
    pub lead_store: Arc<dyn LeadStore>,
    pub scraper: Arc<dyn BaseScraper>,
    pub generator: Arc<dyn BaseGenerator>,
    pub timeouts: StageTimeouts,
}

impl ServerDeps {
    pub fn new(
        job_queue: Arc<dyn JobQueue>,
        lead_store: Arc<dyn LeadStore>,
        scraper: Arc<dyn BaseScraper>,
        generator: Arc<dyn BaseGenerator>,
        timeouts: StageTimeouts,
    ) -> Self {
        Self {
            job_queue,
            lead_store,
            scraper,
            generator,
            timeouts,
        }
    }
}
