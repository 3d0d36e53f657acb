use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{MarketSearch, ReviewSnippet, ReviewSource, SearchHit};
use crate::config::{RequestConfig, SearchConfig};
use crate::error::{SearchError, SearchResult};

const TAVILY_URL: &str = "https://api.tavily.com/search";

/// Review sources worth boosting in queries.
const REVIEW_SITES: &[&str] = &["reddit.com", "rtings.com", "youtube.com"];

/// Tavily-backed web search: review snippets and market context.
#[derive(Clone)]
pub struct TavilyClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl TavilyClient {
    /// Create a new Tavily client. A missing key is allowed; calls then
    /// return empty results.
    pub fn new(config: &SearchConfig, request_config: &RequestConfig) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(SearchError::Http)?;

        Ok(Self {
            client,
            api_key: config.tavily_api_key.clone(),
            base_url: TAVILY_URL.to_string(),
        })
    }

    /// Override the endpoint (for testing).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn search(&self, query: &str, max_results: u32) -> SearchResult<Vec<TavilyResult>> {
        let Some(api_key) = &self.api_key else {
            warn!("TAVILY_API_KEY not set, returning empty search results");
            return Ok(Vec::new());
        };

        debug!(query = %query, "Tavily search");

        let request = TavilyRequest {
            api_key,
            query,
            max_results,
            search_depth: "basic",
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(SearchError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: TavilyResponse =
            response.json().await.map_err(|e| SearchError::InvalidResponse {
                message: format!("Failed to parse Tavily response: {}", e),
            })?;

        Ok(parsed.results)
    }
}

#[async_trait]
impl ReviewSource for TavilyClient {
    async fn search_reviews(&self, query: &str) -> SearchResult<Vec<ReviewSnippet>> {
        let search_query = format!("{} review {}", query, REVIEW_SITES.join(" OR "));
        let results = self.search(&search_query, 8).await?;

        Ok(results
            .into_iter()
            .filter(|r| !r.content.is_empty())
            .map(|r| ReviewSnippet {
                source: source_from_url(&r.url),
                snippet: r.content,
                url: r.url,
                rating: None,
                date: None,
            })
            .collect())
    }
}

#[async_trait]
impl MarketSearch for TavilyClient {
    async fn search_context(&self, query: &str) -> SearchResult<Vec<SearchHit>> {
        let results = self.search(query, 5).await?;

        Ok(results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                content: r.content,
            })
            .collect())
    }
}

/// Derive a human-readable source label from a URL host.
fn source_from_url(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .map(|host| host.trim_start_matches("www.").to_string())
        .unwrap_or_else(|| "web".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_url() {
        assert_eq!(source_from_url("https://www.reddit.com/r/headphones"), "reddit.com");
        assert_eq!(source_from_url("https://rtings.com/review"), "rtings.com");
        assert_eq!(source_from_url("not a url"), "web");
    }

    #[tokio::test]
    async fn test_missing_key_degrades_to_empty() {
        let config = SearchConfig {
            tavily_api_key: None,
            serp_api_key: None,
            region: "CA".to_string(),
        };
        let client = TavilyClient::new(&config, &RequestConfig::default()).unwrap();

        let reviews = client.search_reviews("Sony WH-1000XM5").await.unwrap();
        assert!(reviews.is_empty());

        let hits = client.search_context("best earbuds").await.unwrap();
        assert!(hits.is_empty());
    }
}
