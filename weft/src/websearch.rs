//! Web search adapter for the deep-search graph.
//!
//! [`TavilySearch`] talks to the Tavily REST API (basic depth, five
//! results); [`MockSearch`] serves canned hits for tests. Hits format as
//! `标题/内容/来源` blocks, the shape the planning and summary prompts
//! expect.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("request: {0}")]
    Request(String),
    #[error("search backend not configured")]
    NotConfigured,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub content: String,
    pub url: String,
}

impl SearchHit {
    /// Reference-snippet form used inside the deep-search state.
    pub fn format(&self) -> String {
        format!(
            "标题: {}\n内容: {}\n来源: {}",
            self.title, self.content, self.url
        )
    }
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: String,
}

/// Tavily REST adapter.
pub struct TavilySearch {
    http: reqwest::Client,
    api_key: String,
}

impl TavilySearch {
    const ENDPOINT: &'static str = "https://api.tavily.com/search";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SearchClient for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        if self.api_key.is_empty() {
            return Err(SearchError::NotConfigured);
        }
        let response = self
            .http
            .post(Self::ENDPOINT)
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "search_depth": "basic",
                "max_results": 5,
            }))
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Request(format!(
                "tavily returned {status}: {body}"
            )));
        }
        let body: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        Ok(body
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                content: r.content,
                url: r.url,
            })
            .collect())
    }
}

/// Canned search results keyed by exact query; unknown queries return
/// nothing. Records every query it served.
#[derive(Default)]
pub struct MockSearch {
    hits: Mutex<HashMap<String, Vec<SearchHit>>>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hits(self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.hits
            .lock()
            .expect("mock lock")
            .insert(query.to_string(), hits);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl SearchClient for MockSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.queries.lock().expect("mock lock").push(query.to_string());
        Ok(self
            .hits
            .lock()
            .expect("mock lock")
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: hits format into the 标题/内容/来源 snippet shape.
    #[test]
    fn hit_format() {
        let hit = SearchHit {
            title: "Rust 发布".into(),
            content: "1.80 发布".into(),
            url: "https://blog.rust-lang.org".into(),
        };
        assert_eq!(
            hit.format(),
            "标题: Rust 发布\n内容: 1.80 发布\n来源: https://blog.rust-lang.org"
        );
    }

    /// **Scenario**: the mock serves canned hits and records queries;
    /// unknown queries come back empty, not as errors.
    #[tokio::test]
    async fn mock_serves_and_records() {
        let search = MockSearch::new().with_hits(
            "rust release",
            vec![SearchHit {
                title: "t".into(),
                content: "c".into(),
                url: "u".into(),
            }],
        );
        assert_eq!(search.search("rust release").await.unwrap().len(), 1);
        assert!(search.search("unknown").await.unwrap().is_empty());
        assert_eq!(search.queries(), vec!["rust release", "unknown"]);
    }

    /// **Scenario**: a keyless Tavily client refuses instead of sending a
    /// doomed request.
    #[tokio::test]
    async fn tavily_requires_key() {
        let search = TavilySearch::new("");
        assert!(matches!(
            search.search("q").await,
            Err(SearchError::NotConfigured)
        ));
    }
}
