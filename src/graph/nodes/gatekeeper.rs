//! Quality gate node: evaluates the scouted batch and records the verdict.
//!
//! A veto bumps the loop counter and plants the mutated query for the
//! market scout's retry; a forced proceed may surface a market warning.

use tracing::{debug, info};

use crate::error::NodeError;
use crate::gate::Gatekeeper;
use crate::graph::state::{RunState, StateUpdate};
use crate::graph::PipelineContext;

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    let (candidates, query) = match &state.market_scout_data {
        Some(data) => (data.candidates.as_slice(), data.search_query.as_str()),
        None => {
            debug!("No scout data to gate, proceeding");
            return Ok(StateUpdate::empty());
        }
    };

    let weights = ctx
        .prefs
        .resolve(&state.user_id, &state.preference_overrides)
        .await;

    let gate = Gatekeeper::new(
        ctx.llm.clone(),
        ctx.models.reasoning.clone(),
        ctx.graph.max_gate_retries,
    );
    let decision = gate
        .evaluate(query, candidates, &weights, state.skeptic_loop_count)
        .await;

    info!(
        veto = decision.is_veto(),
        loop_count = state.skeptic_loop_count,
        reason = %decision.reason,
        "Gate verdict"
    );

    let mut update = StateUpdate::empty();
    if decision.is_veto() {
        update.skeptic_feedback_query = decision.mutated_query.clone();
        update.skeptic_loop_count = Some(state.skeptic_loop_count + 1);
    } else {
        // Clear any stale retry query so later scout passes reshape their own.
        update.skeptic_feedback_query = Some(String::new());
    }
    if let Some(warning) = decision.market_warning.clone() {
        update.market_warning = Some(warning);
    }
    update.skeptic_decision = Some(decision);

    Ok(update)
}
