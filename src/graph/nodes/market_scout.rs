//! Alternative scouting: search the market, extract candidates, enrich.
//!
//! The search query is shaped by the user's preference weights (budget,
//! premium, or balanced framing) unless the gate handed back a mutated
//! query from a veto. Scout results are cached under the normalized
//! product name so repeat lookups skip the search entirely.

use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::product_cache_key;
use crate::error::NodeError;
use crate::graph::state::{MarketScoutData, RunState, StateUpdate};
use crate::graph::PipelineContext;
use crate::llm::{extract_json_from_completion, Message};
use crate::prompts::CANDIDATE_EXTRACTION_PROMPT;
use crate::scoring::Candidate;

const MAX_CANDIDATES: usize = 3;
const SCOUT_CACHE_TTL_MINUTES: i64 = 60;

#[derive(Debug, Deserialize)]
struct ExtractionJudgment {
    #[serde(default)]
    candidates: Vec<ExtractedCandidate>,
}

#[derive(Debug, Deserialize)]
struct ExtractedCandidate {
    name: String,
    #[serde(default)]
    reason: String,
}

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    let product_name = state
        .product_query
        .as_ref()
        .map(|p| p.canonical_name.clone())
        .unwrap_or_else(|| state.user_query.clone());

    if product_name.is_empty() {
        debug!("Nothing to scout against, skipping");
        return Ok(StateUpdate::empty());
    }

    // A veto retry always uses the gate's mutated query and bypasses the
    // cache; a cached batch is what just got vetoed.
    let retry_query = state.skeptic_feedback_query.clone().filter(|q| !q.is_empty());
    let is_retry = retry_query.is_some();

    let weights = ctx.prefs.resolve(&state.user_id, &state.preference_overrides).await;
    let search_query = retry_query.unwrap_or_else(|| {
        if weights.price_sensitivity > 0.7 {
            format!("budget affordable alternatives to {}", product_name)
        } else if weights.quality > 0.7 {
            format!("premium high-end alternatives to {}", product_name)
        } else {
            format!("best alternatives to {}", product_name)
        }
    });

    let cache_key = product_cache_key("scout", &search_query);
    if !is_retry {
        if let Some(cached) = ctx.cache.get(&cache_key).await {
            if let Ok(data) = serde_json::from_value::<MarketScoutData>(cached) {
                info!(query = %search_query, "Scout cache hit");
                return Ok(StateUpdate {
                    market_scout_data: Some(data),
                    ..Default::default()
                });
            }
        }
    }

    let candidates = scout(ctx, &search_query, &product_name).await;
    info!(
        query = %search_query,
        candidates = candidates.len(),
        "Market scout complete"
    );

    let data = MarketScoutData {
        candidates,
        search_query,
    };

    if !is_retry && !data.candidates.is_empty() {
        if let Ok(payload) = serde_json::to_value(&data) {
            ctx.cache
                .set(&cache_key, "scout", &payload, SCOUT_CACHE_TTL_MINUTES)
                .await;
        }
    }

    Ok(StateUpdate {
        market_scout_data: Some(data),
        ..Default::default()
    })
}

async fn scout(ctx: &PipelineContext, query: &str, product_name: &str) -> Vec<Candidate> {
    let mut hits = match ctx.market.search_context(query).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(query = %query, error = %e, "Market search failed");
            Vec::new()
        }
    };

    // Backup query when the shaped search finds nothing.
    if hits.is_empty() {
        let backup = format!("{} alternatives comparison", product_name);
        debug!(query = %backup, "Primary search empty, trying backup query");
        hits = ctx.market.search_context(&backup).await.unwrap_or_else(|e| {
            warn!(query = %backup, error = %e, "Backup market search failed");
            Vec::new()
        });
    }

    if hits.is_empty() {
        return Vec::new();
    }

    let extracted = extract_candidates(ctx, query, &hits).await;
    enrich(ctx, extracted).await
}

async fn extract_candidates(
    ctx: &PipelineContext,
    query: &str,
    hits: &[crate::sources::SearchHit],
) -> Vec<ExtractedCandidate> {
    let results_context: Vec<String> = hits
        .iter()
        .map(|h| format!("Title: {}\nURL: {}\nContent: {}", h.title, h.url, h.content))
        .collect();
    let user_message = format!(
        "Search query: {}\n\nSearch results:\n\n{}",
        query,
        results_context.join("\n---\n")
    );

    let messages = vec![
        Message::system(CANDIDATE_EXTRACTION_PROMPT),
        Message::user(user_message),
    ];

    let completion = match ctx.llm.complete(&ctx.models.reasoning, messages).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Candidate extraction call failed");
            return Vec::new();
        }
    };

    match extract_json_from_completion(&completion)
        .map_err(|e| e.to_string())
        .and_then(|json| {
            serde_json::from_str::<ExtractionJudgment>(json).map_err(|e| e.to_string())
        }) {
        Ok(judgment) => judgment
            .candidates
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .take(MAX_CANDIDATES)
            .collect(),
        Err(e) => {
            warn!(error = %e, "Candidate extraction unparseable");
            Vec::new()
        }
    }
}

/// Attach prices and reviews to each extracted candidate, concurrently.
async fn enrich(ctx: &PipelineContext, extracted: Vec<ExtractedCandidate>) -> Vec<Candidate> {
    let futures = extracted.into_iter().map(|c| async move {
        let (prices, reviews) = tokio::join!(
            ctx.prices.search_prices(&c.name),
            ctx.reviews.search_reviews(&c.name),
        );

        let prices = prices.unwrap_or_else(|e| {
            warn!(candidate = %c.name, error = %e, "Candidate price lookup failed");
            Vec::new()
        });
        let reviews = reviews.unwrap_or_else(|e| {
            warn!(candidate = %c.name, error = %e, "Candidate review lookup failed");
            Vec::new()
        });

        let price_text = prices.first().map(|p| format!("${:.2}", p.price()));
        let purchase_link = prices.first().map(|p| p.url.clone());
        let image_url = prices.first().and_then(|p| p.thumbnail.clone());

        Candidate {
            name: c.name,
            reason: c.reason,
            prices,
            reviews,
            is_main: false,
            image_url,
            purchase_link,
            price_text,
        }
    });

    join_all(futures).await
}
