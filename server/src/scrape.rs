//! Web page summaries.
//!
//! [`Scraper::scrape`] fetches an http(s) page with a timeout and a download
//! cap, then extracts the title, description and Open Graph tags, heading
//! and link counts, a word count and a plain-text snippet.
//!
//! # Example
//!
//! ```rust
//! use studio_server::scrape::{safe_url, summarize};
//!
//! let url = safe_url("https://example.com").unwrap();
//! let page = summarize(&url, "<title>Hi</title><h1>Hello</h1>", 5);
//! assert_eq!(page.title, "Hi");
//! assert_eq!(page.counts.h1s, 1);
//! ```

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Largest number of body bytes read from a page.
pub const MAX_BYTES: usize = 500_000;

/// Timeout for the whole fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(12);

/// Characters of page text returned as the snippet.
const SNIPPET_CHARS: usize = 1000;

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));
static CONTENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)content=["']([^"']+)["']"#).expect("valid meta content regex")
});
static H1_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<h1[^>]*>").expect("valid h1 regex"));
static H2_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<h2[^>]*>").expect("valid h2 regex"));
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<a\s+[^>]*href=").expect("valid link regex"));
static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script.*?</script>").expect("valid script regex"));
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style.*?</style>").expect("valid style regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// Errors that can occur while scraping a page.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The input is not an absolute http or https URL.
    #[error("Valid http/https URL is required.")]
    InvalidUrl,

    /// The page answered with a non-success status.
    #[error("Request failed with status {0}")]
    UpstreamStatus(u16),

    /// The fetch did not finish in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The page could not be reached or its body could not be read.
    #[error("request failed: {0}")]
    Request(String),

    /// The HTTP client could not be built.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(FETCH_TIMEOUT)
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Heading, link and word counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCounts {
    pub h1s: usize,
    pub h2s: usize,
    pub links: usize,
    pub words: usize,
}

/// Summary of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub url: String,
    pub fetched_ms: u64,
    pub title: String,
    pub description: String,
    pub og_title: String,
    pub og_description: String,
    pub og_image: String,
    pub counts: PageCounts,
    pub snippet: String,
}

/// Parses `input` as an absolute http or https URL.
pub fn safe_url(input: &str) -> Option<Url> {
    Url::parse(input.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Content of the first `<meta>` tag whose `name` or `property` is `name`.
fn meta(html: &str, name: &str) -> String {
    let pattern = format!(
        r#"(?i)<meta[^>]+(?:name|property)=["']{}["'][^>]*>"#,
        regex::escape(name)
    );
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.find(html))
        .and_then(|tag| CONTENT_RE.captures(tag.as_str()))
        .and_then(|caps| caps.get(1))
        .map(|content| content.as_str().to_string())
        .unwrap_or_default()
}

/// Visible text with scripts, styles and tags removed and whitespace
/// collapsed.
fn visible_text(html: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(html, "");
    let without_styles = STYLE_RE.replace_all(&without_scripts, "");
    let text = TAG_RE.replace_all(&without_styles, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts the summary fields from `html`.
pub fn summarize(url: &Url, html: &str, fetched_ms: u64) -> PageSummary {
    let title = TITLE_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let text = visible_text(html);

    PageSummary {
        url: url.to_string(),
        fetched_ms,
        title,
        description: meta(html, "description"),
        og_title: meta(html, "og:title"),
        og_description: meta(html, "og:description"),
        og_image: meta(html, "og:image"),
        counts: PageCounts {
            h1s: H1_RE.find_iter(html).count(),
            h2s: H2_RE.find_iter(html).count(),
            links: LINK_RE.find_iter(html).count(),
            words: text.split(' ').filter(|w| !w.is_empty()).count(),
        },
        snippet: text.chars().take(SNIPPET_CHARS).collect(),
    }
}

/// Fetches and summarizes pages.
#[derive(Debug, Clone)]
pub struct Scraper {
    http: Client,
}

impl Scraper {
    /// Creates a scraper whose requests time out after [`FETCH_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Configuration`] if the HTTP client cannot be
    /// built.
    pub fn new() -> Result<Self, ScrapeError> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ScrapeError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Downloads at most [`MAX_BYTES`] of the body at `url`.
    ///
    /// # Errors
    ///
    /// [`ScrapeError::UpstreamStatus`] for a non-2xx answer, otherwise
    /// [`ScrapeError::Timeout`] or [`ScrapeError::Request`].
    pub async fn fetch(&self, url: Url) -> Result<String, ScrapeError> {
        debug!(url = %url, "Fetching page");
        let mut response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Page fetch returned non-success status");
            return Err(ScrapeError::UpstreamStatus(status.as_u16()));
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = MAX_BYTES - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Validates `input`, fetches the page and summarizes it.
    ///
    /// # Errors
    ///
    /// [`ScrapeError::InvalidUrl`] for anything but an absolute http(s)
    /// URL, plus the errors of [`Scraper::fetch`].
    pub async fn scrape(&self, input: &str) -> Result<PageSummary, ScrapeError> {
        let started = Instant::now();
        let url = safe_url(input).ok_or(ScrapeError::InvalidUrl)?;
        let html = self.fetch(url.clone()).await?;
        let fetched_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(summarize(&url, &html, fetched_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<!doctype html>
<html>
<head>
  <TITLE>  Studio Sessions  </TITLE>
  <meta name="description" content="Mixing and mastering">
  <meta property='og:title' content='Studio'>
  <meta property="og:image" content="https://cdn.example.com/cover.png" />
  <style>body { color: red; }</style>
  <script>var hidden = "do not count";</script>
</head>
<body>
  <h1 class="hero">Welcome</h1>
  <h2>Rates</h2><h2>Gear</h2>
  <a href="/book">Book now</a> <a class="x" href="/about">About</a> <a name="anchor">x</a>
</body>
</html>"#;

    fn example_url() -> Url {
        safe_url("https://example.com/page").unwrap()
    }

    #[test]
    fn safe_url_accepts_only_http_and_https() {
        assert!(safe_url("https://example.com").is_some());
        assert!(safe_url("  http://example.com/a?b=1 ").is_some());
        assert!(safe_url("ftp://example.com").is_none());
        assert!(safe_url("javascript:alert(1)").is_none());
        assert!(safe_url("example.com").is_none());
        assert!(safe_url("").is_none());
    }

    #[test]
    fn summarize_extracts_tags_and_counts() {
        let page = summarize(&example_url(), PAGE, 7);
        assert_eq!(page.url, "https://example.com/page");
        assert_eq!(page.fetched_ms, 7);
        assert_eq!(page.title, "Studio Sessions");
        assert_eq!(page.description, "Mixing and mastering");
        assert_eq!(page.og_title, "Studio");
        assert_eq!(page.og_description, "");
        assert_eq!(page.og_image, "https://cdn.example.com/cover.png");
        assert_eq!(
            page.counts,
            PageCounts {
                h1s: 1,
                h2s: 2,
                links: 2,
                words: 9,
            }
        );
        assert!(!page.snippet.contains("hidden"));
        assert!(!page.snippet.contains("color"));
        assert!(page.snippet.starts_with("Studio Sessions Welcome"));
    }

    #[test]
    fn summarize_of_empty_page_is_blank() {
        let page = summarize(&example_url(), "", 0);
        assert_eq!(page.title, "");
        assert_eq!(page.counts.words, 0);
        assert_eq!(page.snippet, "");
    }

    #[test]
    fn snippet_is_capped() {
        let html = "word ".repeat(1000);
        let page = summarize(&example_url(), &html, 0);
        assert_eq!(page.snippet.chars().count(), SNIPPET_CHARS);
        assert_eq!(page.counts.words, 1000);
    }

    #[test]
    fn summary_serializes_camel_case() {
        let value = serde_json::to_value(summarize(&example_url(), PAGE, 1)).unwrap();
        assert_eq!(value["ogTitle"], "Studio");
        assert_eq!(value["fetchedMs"], 1);
        assert_eq!(value["counts"]["h2s"], 2);
    }

    #[tokio::test]
    async fn scrape_fetches_and_summarizes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let scraper = Scraper::new().unwrap();
        let page = scraper
            .scrape(&format!("{}/page", server.uri()))
            .await
            .unwrap();
        assert_eq!(page.title, "Studio Sessions");
        assert_eq!(page.counts.links, 2);
    }

    #[tokio::test]
    async fn scrape_reports_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = Scraper::new()
            .unwrap()
            .scrape(&server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::UpstreamStatus(503)));
        assert_eq!(err.to_string(), "Request failed with status 503");
    }

    #[tokio::test]
    async fn scrape_rejects_bad_url_without_fetching() {
        let err = Scraper::new()
            .unwrap()
            .scrape("file:///etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidUrl));
    }

    #[tokio::test]
    async fn fetch_caps_downloaded_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a".repeat(MAX_BYTES + 4096)))
            .mount(&server)
            .await;

        let scraper = Scraper::new().unwrap();
        let body = scraper
            .fetch(safe_url(&server.uri()).unwrap())
            .await
            .unwrap();
        assert_eq!(body.len(), MAX_BYTES);
    }
}
