use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{IdentifiedProduct, ProductIdentifier};
use crate::config::{RequestConfig, SearchConfig};
use crate::error::{SearchError, SearchResult};

const LENS_URL: &str = "https://serpapi.com/search.json";

/// Visual product identification via a Google Lens style API.
#[derive(Clone)]
pub struct LensIdentifier {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct LensResponse {
    #[serde(default)]
    knowledge_graph: Vec<KnowledgeGraphItem>,
    #[serde(default)]
    visual_matches: Vec<VisualMatch>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeGraphItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisualMatch {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

impl LensIdentifier {
    /// Create a new lens identifier. A missing key is allowed; `identify`
    /// then fails and the vision node falls back to LLM identification.
    pub fn new(config: &SearchConfig, request_config: &RequestConfig) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(SearchError::Http)?;

        Ok(Self {
            client,
            api_key: config.serp_api_key.clone(),
            base_url: LENS_URL.to_string(),
        })
    }

    /// Override the endpoint (for testing).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ProductIdentifier for LensIdentifier {
    async fn identify(&self, image_base64: &str) -> SearchResult<IdentifiedProduct> {
        let Some(api_key) = &self.api_key else {
            warn!("SERPAPI_API_KEY not set, lens identification unavailable");
            return Err(SearchError::Api {
                status: 401,
                message: "Lens identification requires SERPAPI_API_KEY".to_string(),
            });
        };

        debug!(image_bytes = image_base64.len(), "Lens identification");

        let response = self
            .client
            .post(&self.base_url)
            .query(&[("engine", "google_lens"), ("api_key", api_key.as_str())])
            .body(image_base64.to_string())
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

        let parsed: LensResponse =
            response.json().await.map_err(|e| SearchError::InvalidResponse {
                message: format!("Failed to parse lens response: {}", e),
            })?;

        // Knowledge graph matches are the strongest signal; visual matches
        // are the fallback within the same response.
        if let Some(kg) = parsed.knowledge_graph.iter().find(|k| k.title.is_some()) {
            return Ok(IdentifiedProduct {
                canonical_name: kg.title.clone().unwrap_or_default(),
                confidence: 0.9,
                source_tag: "lens_knowledge_graph".to_string(),
                link: kg.link.clone(),
            });
        }

        if let Some(vm) = parsed.visual_matches.iter().find(|v| v.title.is_some()) {
            return Ok(IdentifiedProduct {
                canonical_name: vm.title.clone().unwrap_or_default(),
                confidence: 0.6,
                source_tag: "lens_visual_match".to_string(),
                link: vm.link.clone(),
            });
        }

        Err(SearchError::InvalidResponse {
            message: "Lens returned no product matches".to_string(),
        })
    }
}
