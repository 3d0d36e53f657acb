//! Risk report over the research data, content-addressed cache in front.
//!
//! The cache key is a digest of the research payload itself, so two runs
//! over identical data share one report. A failed or unparseable judgment
//! falls back to a deterministic "unverified" report; the fallback is
//! never cached.

use tracing::{debug, info, warn};

use crate::cache::payload_cache_key;
use crate::error::NodeError;
use crate::graph::state::{RiskReport, RunState, StateUpdate};
use crate::graph::PipelineContext;
use crate::llm::{extract_json_from_completion, Message};
use crate::prompts::CRITIQUE_PROMPT;

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    let Some(research) = &state.research_data else {
        debug!("No research data, emitting unverified risk report");
        return Ok(StateUpdate {
            risk_report: Some(RiskReport::unverified()),
            ..Default::default()
        });
    };

    let payload = serde_json::to_value(research).map_err(|e| NodeError::Collaborator {
        message: format!("research data not serializable: {}", e),
    })?;
    let cache_key = payload_cache_key("critique", &payload);

    if let Some(cached) = ctx.cache.get(&cache_key).await {
        if let Ok(report) = serde_json::from_value::<RiskReport>(cached) {
            info!("Critique cache hit");
            return Ok(StateUpdate {
                risk_report: Some(report),
                ..Default::default()
            });
        }
    }

    let product_name = state
        .product_query
        .as_ref()
        .map(|p| p.canonical_name.as_str())
        .unwrap_or("unknown product");

    let user_message = format!(
        "Product: {}\n\nResearch data:\n{}",
        product_name,
        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
    );
    let messages = vec![Message::system(CRITIQUE_PROMPT), Message::user(user_message)];

    let report = match ctx.llm.complete(&ctx.models.analysis, messages).await {
        Ok(completion) => match extract_json_from_completion(&completion)
            .map_err(|e| e.to_string())
            .and_then(|json| serde_json::from_str::<RiskReport>(json).map_err(|e| e.to_string()))
        {
            Ok(report) => {
                if let Ok(value) = serde_json::to_value(&report) {
                    ctx.cache
                        .set(
                            &cache_key,
                            "critique",
                            &value,
                            ctx.graph.critique_cache_ttl_minutes,
                        )
                        .await;
                }
                report
            }
            Err(e) => {
                warn!(error = %e, "Critique judgment unparseable, using fallback report");
                RiskReport::unverified()
            }
        },
        Err(e) => {
            warn!(error = %e, "Critique judgment call failed, using fallback report");
            RiskReport::unverified()
        }
    };

    info!(risk_level = %report.risk_level, "Critique complete");
    Ok(StateUpdate {
        risk_report: Some(report),
        ..Default::default()
    })
}
