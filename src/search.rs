//! Web search client.
//!
//! Serper is the production backend; [`StaticSearch`] serves canned results
//! for tests and offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
#[cfg(any(test, feature = "test-util"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "test-util"))]
use std::sync::Mutex;
use std::time::Duration;

use crate::error::SearchError;
use crate::retry::is_retryable_status;
use crate::types::SourceSnippet;

const SERPER_URL: &str = "https://google.serper.dev/search";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_RESULTS_CAP: u32 = 10;

#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run one query, consuming one unit of provider quota.
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SourceSnippet>, SearchError>;
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
    #[serde(default)]
    knowledge_graph: Option<KnowledgeGraph>,
}

#[derive(Deserialize)]
struct SerperResult {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Deserialize)]
struct KnowledgeGraph {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "descriptionLink")]
    description_link: Option<String>,
}

#[derive(Clone)]
pub struct SerperClient {
    api_key: String,
    endpoint: String,
    agent: ureq::Agent,
}

impl SerperClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(SEARCH_TIMEOUT))
            .build();
        Self {
            api_key: api_key.into(),
            endpoint: SERPER_URL.to_string(),
            agent: config.into(),
        }
    }

    /// Point the client at a different endpoint (e.g. a local mock server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn search_blocking(&self, query: &str, max_results: u32) -> Result<Vec<SourceSnippet>, SearchError> {
        let num = max_results.clamp(1, MAX_RESULTS_CAP);
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .send_json(&SerperRequest { q: query, num });

        match response {
            Ok(mut resp) => {
                let data: SerperResponse = resp.body_mut().read_json().map_err(|e| SearchError {
                    status: None,
                    message: format!("unreadable search response: {}", e),
                    transient: false,
                })?;
                Ok(into_snippets(data, num as usize))
            }
            Err(ureq::Error::StatusCode(code)) => Err(SearchError {
                status: Some(code),
                message: match code {
                    401 | 403 => "invalid API key or quota exceeded".to_string(),
                    _ => format!("HTTP error {}", code),
                },
                transient: is_retryable_status(code),
            }),
            Err(e @ (ureq::Error::Timeout(_) | ureq::Error::Io(_))) => Err(SearchError {
                status: None,
                message: format!("request failed: {}", e),
                transient: true,
            }),
            Err(e) => Err(SearchError {
                status: None,
                message: format!("request error: {}", e),
                transient: false,
            }),
        }
    }
}

fn into_snippets(data: SerperResponse, limit: usize) -> Vec<SourceSnippet> {
    let graph = data.knowledge_graph.and_then(|kg| {
        let url = kg.description_link?;
        Some(SourceSnippet {
            url,
            title: kg.title,
            extracted_text: kg.description.unwrap_or_default(),
        })
    });

    graph
        .into_iter()
        .chain(data.organic.into_iter().take(limit).map(|r| SourceSnippet {
            url: r.link,
            title: r.title,
            extracted_text: r.snippet,
        }))
        .filter(|s| !s.url.is_empty())
        .collect()
}

#[async_trait]
impl SearchClient for SerperClient {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SourceSnippet>, SearchError> {
        let client = self.clone();
        let query = query.to_string();
        tracing::info!(query = %preview(&query, 50), "searching");

        let snippets = tokio::task::spawn_blocking(move || client.search_blocking(&query, max_results))
            .await
            .map_err(|e| SearchError {
                status: None,
                message: format!("search worker panicked: {}", e),
                transient: false,
            })??;

        tracing::info!(results = snippets.len(), "search complete");
        Ok(snippets)
    }
}

/// Render results as numbered Markdown for the research agent.
pub fn format_results(snippets: &[SourceSnippet]) -> String {
    if snippets.is_empty() {
        return "No results found for this search query.".to_string();
    }

    snippets
        .iter()
        .enumerate()
        .map(|(i, s)| format!("**{}. {}**\nURL: {}\n{}\n", i + 1, s.title, s.url, s.extracted_text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(text: &str, max_chars: usize) -> String {
    let cut: String = text.chars().take(max_chars).collect();
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut
    }
}

/// Canned search backend keyed by exact query, with an optional fallback.
#[cfg(any(test, feature = "test-util"))]
#[derive(Default)]
pub struct StaticSearch {
    by_query: HashMap<String, Result<Vec<SourceSnippet>, SearchError>>,
    fallback: Option<Result<Vec<SourceSnippet>, SearchError>>,
    /// One-shot failures, consumed before the canned answer
    failures: Mutex<HashMap<String, SearchError>>,
    queries: Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-util"))]
impl StaticSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, query: impl Into<String>, results: Vec<SourceSnippet>) -> Self {
        self.by_query.insert(query.into(), Ok(results));
        self
    }

    pub fn with_error(mut self, query: impl Into<String>, error: SearchError) -> Self {
        self.by_query.insert(query.into(), Err(error));
        self
    }

    /// Fail the next call for `query` with `error`, then answer normally.
    pub fn fail_once(self, query: impl Into<String>, error: SearchError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(query.into(), error);
        }
        self
    }

    /// Results for any query without its own entry.
    pub fn with_fallback(mut self, results: Result<Vec<SourceSnippet>, SearchError>) -> Self {
        self.fallback = Some(results);
        self
    }

    /// Every query received, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl SearchClient for StaticSearch {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SourceSnippet>, SearchError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        if let Some(error) = self.failures.lock().ok().and_then(|mut f| f.remove(query)) {
            return Err(error);
        }

        let answer = self
            .by_query
            .get(query)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));

        answer.map(|mut results| {
            results.truncate(max_results.clamp(1, MAX_RESULTS_CAP) as usize);
            results
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_snippets_caps_and_keeps_graph_first() {
        let data: SerperResponse = serde_json::from_value(serde_json::json!({
            "knowledgeGraph": {
                "title": "Radiology",
                "description": "Medical imaging specialty",
                "descriptionLink": "https://en.wikipedia.org/wiki/Radiology"
            },
            "organic": [
                {"title": "A", "link": "https://a.example", "snippet": "alpha"},
                {"title": "B", "link": "https://b.example", "snippet": "beta"},
                {"title": "C", "link": "https://c.example", "snippet": "gamma"}
            ]
        }))
        .unwrap();

        let snippets = into_snippets(data, 2);
        let urls: Vec<&str> = snippets.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://en.wikipedia.org/wiki/Radiology", "https://a.example", "https://b.example"]
        );
        assert_eq!(snippets[1].extracted_text, "alpha");
    }

    #[test]
    fn test_missing_sections_parse_as_empty() {
        let data: SerperResponse = serde_json::from_str("{}").unwrap();
        assert!(into_snippets(data, 5).is_empty());
    }

    #[test]
    fn test_format_results() {
        let snippets = vec![SourceSnippet {
            url: "https://a.example".to_string(),
            title: "Alpha".to_string(),
            extracted_text: "First result".to_string(),
        }];
        let text = format_results(&snippets);
        assert!(text.starts_with("**1. Alpha**"));
        assert!(text.contains("URL: https://a.example"));
        assert_eq!(format_results(&[]), "No results found for this search query.");
    }

    #[tokio::test]
    async fn test_static_search_records_queries() {
        let search = StaticSearch::new()
            .with_results(
                "rust",
                vec![SourceSnippet {
                    url: "https://rust-lang.org".to_string(),
                    title: "Rust".to_string(),
                    extracted_text: "A language".to_string(),
                }],
            )
            .with_fallback(Ok(vec![]));

        assert_eq!(search.search("rust", 5).await.unwrap().len(), 1);
        assert!(search.search("go", 5).await.unwrap().is_empty());
        assert_eq!(search.queries(), vec!["rust", "go"]);
    }
}
