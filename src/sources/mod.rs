//! External collaborators: product identification, review discovery,
//! price lookup, and market context search.
//!
//! Each collaborator is a trait seam with a reqwest-backed implementation.
//! Missing credentials are a defined degraded state (empty results), never
//! an error that escapes into the pipeline.

mod lens;
mod shopping;
mod tavily;

pub use lens::LensIdentifier;
pub use shopping::ShoppingClient;
pub use tavily::TavilyClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchResult;

/// A product identified from an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifiedProduct {
    /// Canonical product name suitable for search queries.
    pub canonical_name: String,
    /// Identification confidence (0.0-1.0).
    pub confidence: f64,
    /// Which identification path produced the match.
    pub source_tag: String,
    /// Product page link when the identifier found one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// A review snippet scraped from the web.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSnippet {
    pub source: String,
    pub snippet: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// A retail price offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceOffer {
    pub vendor: String,
    pub price_cents: i64,
    pub currency: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl PriceOffer {
    /// Price in major currency units.
    pub fn price(&self) -> f64 {
        self.price_cents as f64 / 100.0
    }
}

/// A generic web search hit used for market context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Identifies a product from an image payload.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductIdentifier: Send + Sync {
    /// Identify the main commercial product in the image.
    async fn identify(&self, image_base64: &str) -> SearchResult<IdentifiedProduct>;
}

/// Finds review snippets for a product query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReviewSource: Send + Sync {
    /// Search for review snippets. Missing credentials yield an empty list.
    async fn search_reviews(&self, query: &str) -> SearchResult<Vec<ReviewSnippet>>;
}

/// Finds retail price offers for a product query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Search for shopping offers. Missing credentials yield an empty list.
    async fn search_prices(&self, query: &str) -> SearchResult<Vec<PriceOffer>>;
}

/// General web search for market context.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSearch: Send + Sync {
    /// Search for market context documents.
    async fn search_context(&self, query: &str) -> SearchResult<Vec<SearchHit>>;
}
