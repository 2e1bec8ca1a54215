//! Simple web scraper - local HTTP + HTML parsing of a lead's homepage
//!
//! This implementation:
//! - Uses reqwest for HTTP requests
//! - Uses scraper crate for HTML parsing
//! - Extracts headings/paragraph text, meta description, social profile links
//!   and naive tech-stack signals
//!
//! Limitations:
//! - No JavaScript rendering (client-rendered sites yield little text)

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use super::{BaseScraper, CapabilityError, ScrapeResult};

/// Extracted text is cut to this many characters.
pub const MAX_TEXT_CHARS: usize = 10_000;

const SOCIAL_DOMAINS: &[&str] = &[
    "twitter.com",
    "x.com",
    "linkedin.com",
    "facebook.com",
    "instagram.com",
    "github.com",
    "youtube.com",
];

/// (selector, category, technology). Later matches win within a category.
const TECH_SIGNALS: &[(&str, &str, &str)] = &[
    ("#__next", "Framework", "Next.js"),
    ("div[id^=\"gatsby\"]", "Framework", "Gatsby"),
    ("script[src*=\"wp-content\"]", "CMS", "WordPress"),
    ("script[src*=\"shopify\"]", "E-commerce", "Shopify"),
    ("script[src*=\"wix\"]", "CMS", "Wix"),
    ("script[src*=\"squarespace\"]", "CMS", "Squarespace"),
];

/// Homepage scraper using reqwest + scraper
pub struct SimpleScraper {
    client: reqwest::Client,
    timeout: Duration,
}

impl SimpleScraper {
    pub fn new(timeout: Duration) -> Result<Self> {
        // Use a browser-like User-Agent to avoid bot detection
        let user_agent = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, timeout })
    }

    /// Fetch raw HTML, returning the final URL after redirects.
    async fn fetch_html(&self, url: &str) -> Result<(Url, String), CapabilityError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CapabilityError::RateLimited(format!("HTTP 429 for {}", url)));
        }
        if !status.is_success() {
            return Err(CapabilityError::Fetch(format!("HTTP {} for {}", status, url)));
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        Ok((final_url, body))
    }

    fn transport_error(&self, error: reqwest::Error) -> CapabilityError {
        if error.is_timeout() {
            CapabilityError::Timeout(self.timeout)
        } else {
            CapabilityError::Fetch(error.to_string())
        }
    }
}

#[async_trait]
impl BaseScraper for SimpleScraper {
    async fn scrape(&self, domain: &str) -> Result<ScrapeResult, CapabilityError> {
        let url = normalize_url(domain);
        info!(url = %url, "scraping homepage");

        let (final_url, html) = self.fetch_html(&url).await?;
        let result = extract_page(&html, &final_url);

        debug!(
            url = %final_url,
            text_chars = result.raw_text.chars().count(),
            social_links = result.social_links.len(),
            "scraped homepage"
        );
        Ok(result)
    }
}

/// Prefix bare domains with `https://`.
pub fn normalize_url(domain: &str) -> String {
    let domain = domain.trim();
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    }
}

/// Extract pipeline content from an HTML document.
///
/// Kept synchronous: `scraper::Html` is not `Send` and must not live across
/// an await point.
pub fn extract_page(html: &str, base_url: &Url) -> ScrapeResult {
    let document = Html::parse_document(html);

    ScrapeResult {
        raw_text: extract_text(&document),
        meta_description: extract_meta_description(&document),
        social_links: extract_social_links(&document, base_url),
        tech_stack: detect_tech_stack(&document),
    }
}

fn select_all<'a>(document: &'a Html, css: &str) -> Vec<scraper::ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn element_text(element: &scraper::ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Headings (h1-h3) first, then paragraphs, separated by blank lines.
fn extract_text(document: &Html) -> String {
    let headings = select_all(document, "h1, h2, h3");
    let paragraphs = select_all(document, "p");

    let text = headings
        .iter()
        .chain(paragraphs.iter())
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    text.chars().take(MAX_TEXT_CHARS).collect()
}

fn extract_meta_description(document: &Html) -> Option<String> {
    ["meta[name=\"description\"]", "meta[property=\"og:description\"]"]
        .iter()
        .find_map(|css| {
            select_all(document, css)
                .first()
                .and_then(|el| el.value().attr("content"))
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
        })
}

fn is_social_host(host: &str) -> bool {
    let host = host.trim_start_matches("www.");
    SOCIAL_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

fn extract_social_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    select_all(document, "a[href]")
        .iter()
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base_url.join(href).ok())
        .filter(|url| url.host_str().is_some_and(is_social_host))
        .map(String::from)
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

fn detect_tech_stack(document: &Html) -> BTreeMap<String, String> {
    let mut stack = BTreeMap::new();
    for (css, category, tech) in TECH_SIGNALS {
        if !select_all(document, css).is_empty() {
            stack.insert(category.to_string(), tech.to_string());
        }
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url(" http://example.com "), "http://example.com");
        assert_eq!(normalize_url("https://example.com/a"), "https://example.com/a");
    }

    #[test]
    fn test_text_orders_headings_before_paragraphs() {
        let html = r#"
            <html><body>
              <p>First   paragraph.</p>
              <h1>Welcome</h1>
              <p></p>
              <h3>Pricing</h3>
              <p>Second paragraph.</p>
            </body></html>
        "#;
        let result = extract_page(html, &base());
        assert_eq!(
            result.raw_text,
            "Welcome\n\nPricing\n\nFirst paragraph.\n\nSecond paragraph."
        );
    }

    #[test]
    fn test_text_is_truncated() {
        let long = "a".repeat(MAX_TEXT_CHARS + 500);
        let html = format!("<p>{}</p>", long);
        let result = extract_page(&html, &base());
        assert_eq!(result.raw_text.chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn test_meta_description_falls_back_to_og() {
        let html = r#"<head><meta property="og:description" content="OG text"></head>"#;
        assert_eq!(
            extract_page(html, &base()).meta_description.as_deref(),
            Some("OG text")
        );

        let html = r#"<head>
            <meta name="description" content="Plain">
            <meta property="og:description" content="OG text">
        </head>"#;
        assert_eq!(
            extract_page(html, &base()).meta_description.as_deref(),
            Some("Plain")
        );

        assert_eq!(extract_page("<p>hi</p>", &base()).meta_description, None);
    }

    #[test]
    fn test_social_links_are_deduplicated_in_order() {
        let html = r#"
            <a href="https://www.linkedin.com/company/acme">in</a>
            <a href="https://twitter.com/acme">tw</a>
            <a href="https://www.linkedin.com/company/acme">in again</a>
            <a href="/about">about</a>
            <a href="https://notx.com/acme">not social</a>
            <a href="https://github.com/acme">gh</a>
        "#;
        let result = extract_page(html, &base());
        assert_eq!(
            result.social_links,
            vec![
                "https://www.linkedin.com/company/acme",
                "https://twitter.com/acme",
                "https://github.com/acme",
            ]
        );
    }

    #[test]
    fn test_detects_tech_stack() {
        let html = r#"
            <div id="__next"></div>
            <script src="/wp-content/themes/x.js"></script>
            <script src="https://cdn.shopify.com/s.js"></script>
        "#;
        let stack = extract_page(html, &base()).tech_stack;
        assert_eq!(stack.get("Framework").map(String::as_str), Some("Next.js"));
        assert_eq!(stack.get("CMS").map(String::as_str), Some("WordPress"));
        assert_eq!(stack.get("E-commerce").map(String::as_str), Some("Shopify"));
    }

    #[test]
    fn test_later_signal_wins_category() {
        let html = r#"
            <script src="/wp-content/a.js"></script>
            <script src="https://static.squarespace.com/b.js"></script>
        "#;
        let stack = extract_page(html, &base()).tech_stack;
        assert_eq!(stack.get("CMS").map(String::as_str), Some("Squarespace"));
    }
}
