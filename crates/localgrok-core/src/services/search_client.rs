use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Returned by [`format_for_model`] when a search produced nothing usable.
pub const NO_RESULTS: &str = "No results found.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Search service unreachable: {0}")]
    Unreachable(String),

    #[error("Search service returned {status}")]
    Status { status: u16 },

    #[error("Invalid search response: {0}")]
    Decode(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// One web result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchHit {
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
}

/// A normalized search response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResults {
    pub direct_answer: Option<String>,
    /// First infobox text, if any.
    pub summary: Option<String>,
    pub results: Vec<SearchHit>,
    pub total_count: u64,
}

impl SearchResults {
    /// Cut every snippet to at most `max_chars` characters.
    pub fn with_snippet_limit(mut self, max_chars: usize) -> Self {
        for hit in &mut self.results {
            if let Some(content) = hit.content.as_mut()
                && content.chars().count() > max_chars
            {
                let cut: String = content.chars().take(max_chars).collect();
                *content = format!("{}…", cut.trim_end());
            }
        }
        self
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResults, SearchError>;
}

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    number_of_results: Option<f64>,
    #[serde(default)]
    results: Vec<SearxngResult>,
    #[serde(default)]
    answers: Vec<serde_json::Value>,
    #[serde(default)]
    infoboxes: Vec<SearxngInfobox>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearxngInfobox {
    #[serde(default)]
    content: Option<String>,
}

impl From<SearxngResponse> for SearchResults {
    fn from(r: SearxngResponse) -> Self {
        // Newer SearXNG versions return answers as objects with an `answer` field.
        let direct_answer = r.answers.into_iter().find_map(|a| match a {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("answer")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        });

        let results: Vec<SearchHit> = r
            .results
            .into_iter()
            .map(|h| SearchHit {
                title: h.title,
                content: h.content,
                url: h.url,
            })
            .collect();

        let reported = r.number_of_results.unwrap_or(0.0).max(0.0) as u64;

        Self {
            direct_answer: direct_answer.filter(|a| !a.trim().is_empty()),
            summary: r
                .infoboxes
                .into_iter()
                .next()
                .and_then(|i| i.content)
                .filter(|c| !c.trim().is_empty()),
            total_count: reported.max(results.len() as u64),
            results,
        }
    }
}

/// Client for a SearXNG instance with the JSON output format enabled.
#[derive(Clone)]
pub struct SearxngClient {
    http: reqwest::Client,
    base_url: String,
}

impl SearxngClient {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, SearchError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| SearchError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for SearxngClient {
    async fn search(&self, query: &str) -> Result<SearchResults, SearchError> {
        debug!(query, "Searching the web");

        let response = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| SearchError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::Status {
                status: response.status().as_u16(),
            });
        }

        let body: SearxngResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;

        let results = SearchResults::from(body);
        debug!(hits = results.results.len(), "Search finished");
        Ok(results)
    }
}

/// Render results as the text block handed back to the model.
///
/// Direct answer first, then the infobox summary, then up to `max_results`
/// numbered hits.
pub fn format_for_model(response: &SearchResults, max_results: usize) -> String {
    let mut out = String::new();

    if let Some(answer) = &response.direct_answer {
        let _ = writeln!(out, "Direct Answer: {answer}\n");
    }

    if let Some(summary) = &response.summary {
        let _ = writeln!(out, "Summary: {summary}\n");
    }

    let top: Vec<&SearchHit> = response.results.iter().take(max_results).collect();
    if !top.is_empty() {
        out.push_str("Search Results:\n");
        for (i, hit) in top.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, hit.title.as_deref().unwrap_or("No title"));
            if let Some(content) = &hit.content {
                let _ = writeln!(out, "   {content}");
            }
            out.push('\n');
        }
    }

    let trimmed = out.trim();
    if trimmed.is_empty() {
        NO_RESULTS.to_string()
    } else {
        trimmed.to_string()
    }
}
