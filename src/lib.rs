//! # ShopSage
//!
//! A product-recommendation orchestration engine: photograph a product,
//! get a preference-weighted recommendation with vetted alternatives.
//!
//! ## Pipeline
//!
//! - **Identify**: visual search (with an LLM fallback) names the product
//! - **Discover**: reviews and price offers are gathered concurrently with
//!   a market scout that extracts alternative candidates
//! - **Gate**: a quality gate vetoes weak candidate batches and retries the
//!   scout with a mutated query, bounded by a retry ceiling
//! - **Critique**: a cached, content-addressed risk report over the data
//! - **Analyze**: preference-weighted scoring and ranking of the batch
//! - **Respond**: a schema-valid recommendation payload, with deterministic
//!   fallbacks at every judgment boundary
//!
//! Follow-up turns re-enter the graph conversationally: persisted stage
//! outputs are re-injected and identification never runs twice.
//!
//! ## Architecture
//!
//! ```text
//! CLI → Graph Engine → Stage Nodes → LLM / Search APIs (HTTP)
//!              ↓
//!        SQLite (cache, preferences, history, snapshots)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shopsage::config::Config;
//! use shopsage::graph::{Graph, NodeId, PipelineContext};
//! use shopsage::graph::state::RunState;
//! use shopsage::llm::LlmClient;
//! use shopsage::sources::{LensIdentifier, ShoppingClient, TavilyClient};
//! use shopsage::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let llm = Arc::new(LlmClient::new(&config.llm, config.request.clone())?);
//!     let tavily = Arc::new(TavilyClient::new(&config.search, &config.request)?);
//!     let graph = Graph::new(PipelineContext::new(
//!         llm,
//!         Arc::new(LensIdentifier::new(&config.search, &config.request)?),
//!         tavily.clone(),
//!         Arc::new(ShoppingClient::new(&config.search, &config.request)?),
//!         tavily,
//!         storage,
//!         config.llm.models.clone(),
//!         config.graph.clone(),
//!     ));
//!     let state = RunState::new("conv-1", "what is this?").with_image("...");
//!     let final_state = graph.run(NodeId::Router, state).await?;
//!     println!("{:?}", final_state.final_recommendation);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Content-addressed result cache with TTL expiry.
pub mod cache;
/// Configuration management for the pipeline.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Quality gate over scouted candidate batches.
pub mod gate;
/// Orchestration graph: engine, routing, state, and stage nodes.
pub mod graph;
/// LLM client and JSON judgment plumbing.
pub mod llm;
/// Preference weights: defaults, merging, and behavior learning.
pub mod prefs;
/// System prompts for pipeline judgments.
pub mod prompts;
/// Preference-weighted scoring and ranking.
pub mod scoring;
/// External collaborators: identification, reviews, prices, market search.
pub mod sources;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use graph::{Graph, NodeId, PipelineContext};
