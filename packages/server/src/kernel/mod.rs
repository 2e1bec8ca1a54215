//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod jobs;
pub mod openai_generator;
pub mod simple_scraper;
pub mod test_dependencies;
pub mod traits;

/// Default model for analysis and copywriting.
pub const GPT_4O_MINI: &str = "gpt-4o-mini";

pub use deps::{ServerDeps, StageTimeouts};
pub use openai_generator::OpenAiGenerator;
pub use simple_scraper::SimpleScraper;
pub use test_dependencies::TestDependencies;
pub use traits::*;
