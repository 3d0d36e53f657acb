//! Preference-weighted analysis: judge, score, and rank the batch.
//!
//! The batch is the scouted alternatives plus the main product. Each
//! candidate gets a review-sentiment judgment from the LLM, run through a
//! bounded worker pool with a per-task timeout; a candidate whose judgment
//! fails or times out falls back to neutral scores rather than dropping
//! out of the ranking.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::graph::state::{AnalysisObject, ReviewAnalysis, RunState, StateUpdate};
use crate::graph::PipelineContext;
use crate::llm::{extract_json_from_completion, Message};
use crate::prompts::REVIEW_ANALYSIS_PROMPT;
use crate::scoring::{self, Candidate, ScoredCandidate};

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    let batch = build_batch(state);
    if batch.is_empty() {
        debug!("Nothing to analyze");
        return Ok(StateUpdate::empty());
    }

    let weights = ctx
        .prefs
        .resolve(&state.user_id, &state.preference_overrides)
        .await;
    let market_avg = scoring::market_average(&batch);

    // Judgments run through a bounded pool; order is restored by index.
    let timeout = Duration::from_millis(ctx.graph.subtask_timeout_ms);
    let mut judged: Vec<(usize, ReviewAnalysis)> = stream::iter(batch.iter().enumerate())
        .map(|(idx, candidate)| async move {
            let analysis = match tokio::time::timeout(timeout, judge(ctx, candidate)).await {
                Ok(analysis) => analysis,
                Err(_) => {
                    warn!(candidate = %candidate.name, "Review judgment timed out");
                    ReviewAnalysis::default()
                }
            };
            (idx, analysis)
        })
        .buffer_unordered(ctx.graph.scoring_workers)
        .collect()
        .await;
    judged.sort_by_key(|(idx, _)| *idx);

    let mut ranked: Vec<ScoredCandidate> = batch
        .iter()
        .zip(judged.iter())
        .map(|(candidate, (_, analysis))| {
            let price_val = candidate.primary_price();
            let details = scoring::score(
                analysis.trust_score,
                analysis.sentiment_score,
                price_val,
                market_avg,
                &weights,
                analysis.eco_score,
            );
            ScoredCandidate {
                name: candidate.name.clone(),
                reason: candidate.reason.clone(),
                score_details: details,
                sentiment_summary: analysis.summary.clone(),
                eco_notes: analysis.eco_notes.clone(),
                is_main: candidate.is_main,
                price_val,
                image_url: candidate.image_url.clone(),
                purchase_link: candidate.purchase_link.clone(),
                price_text: candidate.price_text.clone(),
            }
        })
        .collect();

    scoring::rank(&mut ranked);

    let recommended = match scoring::recommended(&ranked) {
        Some(pick) => pick,
        None => return Ok(StateUpdate::empty()),
    };
    let recommended_name = recommended.name.clone();
    let price_verdict = scoring::price_verdict(recommended.price_val, market_avg).to_string();
    let better_alternative_found = ranked
        .first()
        .map(|top| !top.is_main && ranked.iter().any(|c| c.is_main))
        .unwrap_or(false);

    info!(
        recommended = %recommended_name,
        candidates = ranked.len(),
        market_avg,
        better_alternative_found,
        "Analysis complete"
    );

    let analyses: Vec<ReviewAnalysis> = judged.into_iter().map(|(_, a)| a).collect();

    Ok(StateUpdate {
        analysis_object: Some(AnalysisObject {
            ranked,
            recommended_name,
            market_average: market_avg,
            price_verdict,
            better_alternative_found,
            applied_weights: weights,
        }),
        alternatives_analysis: Some(analyses),
        ..Default::default()
    })
}

/// Assemble the scoring batch: scouted candidates plus the main product.
fn build_batch(state: &RunState) -> Vec<Candidate> {
    let mut batch: Vec<Candidate> = state
        .market_scout_data
        .as_ref()
        .map(|d| d.candidates.clone())
        .unwrap_or_default();

    if let Some(product) = &state.product_query {
        let research = state.research_data.as_ref();
        let prices = research.map(|r| r.prices.clone()).unwrap_or_default();
        let reviews = research.map(|r| r.reviews.clone()).unwrap_or_default();
        let price_text = prices.first().map(|p| format!("${:.2}", p.price()));
        let purchase_link = prices
            .first()
            .map(|p| p.url.clone())
            .or_else(|| product.link.clone());

        batch.push(Candidate {
            name: product.canonical_name.clone(),
            reason: "The product you photographed".to_string(),
            prices,
            reviews,
            is_main: true,
            image_url: None,
            purchase_link,
            price_text,
        });
    }

    batch
}

async fn judge(ctx: &PipelineContext, candidate: &Candidate) -> ReviewAnalysis {
    let reviews_context = if candidate.reviews.is_empty() {
        "NO USER REVIEWS AVAILABLE. Assess from the product name, brand, and category.".to_string()
    } else {
        candidate
            .reviews
            .iter()
            .map(|r| {
                format!(
                    "Source: {}\nRating: {}\nContent: {}",
                    r.source,
                    r.rating.map_or("n/a".to_string(), |v| v.to_string()),
                    r.snippet
                )
            })
            .collect::<Vec<_>>()
            .join("\n---\n")
    };

    let user_message = format!(
        "Product: {}\n\nCollected reviews:\n{}",
        candidate.name, reviews_context
    );
    let messages = vec![
        Message::system(REVIEW_ANALYSIS_PROMPT),
        Message::user(user_message),
    ];

    let completion = match ctx.llm.complete(&ctx.models.analysis, messages).await {
        Ok(text) => text,
        Err(e) => {
            warn!(candidate = %candidate.name, error = %e, "Review judgment call failed");
            return ReviewAnalysis::default();
        }
    };

    extract_json_from_completion(&completion)
        .map_err(|e| e.to_string())
        .and_then(|json| serde_json::from_str::<ReviewAnalysis>(json).map_err(|e| e.to_string()))
        .unwrap_or_else(|e| {
            warn!(candidate = %candidate.name, error = %e, "Review judgment unparseable");
            ReviewAnalysis::default()
        })
}
