//! Intent routing for a turn.
//!
//! A first turn with a fresh image skips the LLM entirely and goes straight
//! to the vision path. Anything else is classified by the router judgment;
//! invalid output defaults to chat so a turn is never dropped.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::NodeError;
use crate::graph::state::{RouterIntent, RunState, StateUpdate};
use crate::graph::PipelineContext;
use crate::llm::{extract_json_from_completion, Message};
use crate::prompts::ROUTER_PROMPT;

#[derive(Debug, Deserialize)]
struct RouterJudgment {
    intent: RouterIntent,
}

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    // Fast path: fresh image, no history, nothing to classify.
    if state.image_base64.is_some() && state.chat_history.is_empty() && !state.skip_vision {
        debug!("Fresh image with empty history, routing to vision");
        return Ok(StateUpdate {
            router_decision: Some(RouterIntent::VisionSearch),
            ..Default::default()
        });
    }

    let mut context_lines: Vec<String> = state
        .chat_history
        .iter()
        .rev()
        .take(5)
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect();
    context_lines.reverse();

    let user_message = format!(
        "Recent conversation:\n{}\n\nUser attached a new image: {}\n\nCurrent message: {}",
        if context_lines.is_empty() {
            "(none)".to_string()
        } else {
            context_lines.join("\n")
        },
        state.image_base64.is_some(),
        state.user_query,
    );

    let messages = vec![Message::system(ROUTER_PROMPT), Message::user(user_message)];

    let intent = match ctx.llm.complete(&ctx.models.reasoning, messages).await {
        Ok(completion) => match extract_json_from_completion(&completion)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                serde_json::from_str::<RouterJudgment>(json).map_err(|e| e.to_string())
            }) {
            Ok(judgment) => judgment.intent,
            Err(e) => {
                warn!(error = %e, "Router judgment unparseable, defaulting to chat");
                RouterIntent::Chat
            }
        },
        Err(e) => {
            warn!(error = %e, "Router judgment call failed, defaulting to chat");
            RouterIntent::Chat
        }
    };

    // Vision without an image is not actionable; treat as chat.
    let intent = if intent == RouterIntent::VisionSearch && state.image_base64.is_none() {
        RouterIntent::Chat
    } else {
        intent
    };

    debug!(?intent, "Routed turn");
    Ok(StateUpdate {
        router_decision: Some(intent),
        ..Default::default()
    })
}
