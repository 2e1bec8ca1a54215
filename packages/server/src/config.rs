use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::{GPT_4O_MINI, StageTimeouts};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Required by the server; the CLI runs without it
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub scrape_concurrency: usize,
    pub analyze_concurrency: usize,
    pub draft_concurrency: usize,
    pub scrape_timeout: Duration,
    pub generation_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Run the stage workers in the server process
    pub run_workers: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_or("PORT", 3000)?,
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| GPT_4O_MINI.to_string()),
            scrape_concurrency: parse_or("SCRAPE_CONCURRENCY", 1)?,
            analyze_concurrency: parse_or("ANALYZE_CONCURRENCY", 1)?,
            draft_concurrency: parse_or("DRAFT_CONCURRENCY", 1)?,
            scrape_timeout: Duration::from_secs(parse_or("SCRAPE_TIMEOUT_SECS", 30)?),
            generation_timeout: Duration::from_secs(parse_or("GENERATION_TIMEOUT_SECS", 60)?),
            shutdown_grace: Duration::from_secs(parse_or("SHUTDOWN_GRACE_SECS", 30)?),
            run_workers: parse_flag("RUN_WORKERS", true)?,
        })
    }

    pub fn require_openai_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY must be set")
    }

    pub fn timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            scrape: self.scrape_timeout,
            generation: self.generation_timeout,
        }
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

fn parse_flag(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(value) => parse_bool(&value).with_context(|| format!("{} must be true or false", name)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
