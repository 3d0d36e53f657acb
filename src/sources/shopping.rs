use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{PriceOffer, PriceSource};
use crate::config::{RequestConfig, SearchConfig};
use crate::error::{SearchError, SearchResult};

const SHOPPING_URL: &str = "https://serpapi.com/search.json";

/// SerpAPI Google Shopping price lookup.
#[derive(Clone)]
pub struct ShoppingClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    region: String,
}

#[derive(Debug, Deserialize)]
struct ShoppingResponse {
    #[serde(default)]
    shopping_results: Vec<ShoppingItem>,
}

#[derive(Debug, Deserialize)]
struct ShoppingItem {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    price: Option<serde_json::Value>,
    #[serde(default)]
    extracted_price: Option<f64>,
    #[serde(default)]
    product_link: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
}

impl ShoppingClient {
    /// Create a new shopping client. A missing key is allowed; calls then
    /// return empty results.
    pub fn new(config: &SearchConfig, request_config: &RequestConfig) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(SearchError::Http)?;

        Ok(Self {
            client,
            api_key: config.serp_api_key.clone(),
            base_url: SHOPPING_URL.to_string(),
            region: config.region.to_lowercase(),
        })
    }

    /// Override the endpoint (for testing).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Parse a price field that may be numeric or a display string like "$5.88".
fn parse_price_cents(item: &ShoppingItem) -> Option<i64> {
    if let Some(extracted) = item.extracted_price {
        if extracted > 0.0 {
            return Some((extracted * 100.0).round() as i64);
        }
    }

    match &item.price {
        Some(serde_json::Value::Number(n)) => {
            n.as_f64().filter(|v| *v > 0.0).map(|v| (v * 100.0).round() as i64)
        }
        Some(serde_json::Value::String(s)) => {
            let cleaned = s.replace(['$', ','], "");
            cleaned
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| *v > 0.0)
                .map(|v| (v * 100.0).round() as i64)
        }
        _ => None,
    }
}

#[async_trait]
impl PriceSource for ShoppingClient {
    async fn search_prices(&self, query: &str) -> SearchResult<Vec<PriceOffer>> {
        let Some(api_key) = &self.api_key else {
            warn!("SERPAPI_API_KEY not set, returning empty price results");
            return Ok(Vec::new());
        };

        debug!(query = %query, "Shopping price search");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("engine", "google_shopping"),
                ("q", query),
                ("gl", self.region.as_str()),
                ("hl", "en"),
                ("api_key", api_key.as_str()),
            ])
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

        let parsed: ShoppingResponse =
            response.json().await.map_err(|e| SearchError::InvalidResponse {
                message: format!("Failed to parse shopping response: {}", e),
            })?;

        let currency = if self.region == "ca" { "CAD" } else { "USD" };

        let offers = parsed
            .shopping_results
            .into_iter()
            .filter_map(|item| {
                let price_cents = parse_price_cents(&item)?;
                let url = item.product_link.clone().or_else(|| item.link.clone())?;
                Some(PriceOffer {
                    vendor: item.source.clone().unwrap_or_else(|| "Unknown".to_string()),
                    price_cents,
                    currency: currency.to_string(),
                    url,
                    thumbnail: item.thumbnail.clone(),
                })
            })
            .collect();

        Ok(offers)
    }
}
