//! Conversational turns over an existing recommendation.
//!
//! The chat judgment answers the user and decides whether the turn ends
//! here or re-enters the pipeline at a targeted stage (a new scout pass
//! or a re-ranking). Preference updates the user states are persisted and
//! applied to the current turn as overrides. This path never re-enters
//! identification.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::graph::state::{FinalRecommendation, LoopStep, RunState, StateUpdate};
use crate::graph::PipelineContext;
use crate::llm::{extract_json_from_completion, Message};
use crate::prompts::CHAT_PROMPT;
use crate::storage::ChatMessage;

/// Recent messages included in the chat context.
const HISTORY_WINDOW: usize = 5;
/// Ceiling on the serialized analysis excerpt in the prompt.
const ANALYSIS_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct ChatJudgment {
    reply: String,
    #[serde(default = "default_loop_step")]
    loop_step: LoopStep,
    #[serde(default)]
    budget_limit: Option<f64>,
    #[serde(default)]
    preference_updates: HashMap<String, f64>,
}

fn default_loop_step() -> LoopStep {
    LoopStep::End
}

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    let judgment = match chat_judgment(ctx, state).await {
        Some(judgment) => judgment,
        None => ChatJudgment {
            reply: "Sorry, I could not process that. Could you rephrase?".to_string(),
            loop_step: LoopStep::End,
            budget_limit: None,
            preference_updates: HashMap::new(),
        },
    };

    let mut update = StateUpdate {
        loop_step: Some(judgment.loop_step),
        ..Default::default()
    };

    // Persist stated preferences and apply them to this turn.
    if !judgment.preference_updates.is_empty() {
        persist_preferences(ctx, state, &judgment.preference_updates).await;
        let mut overrides = state.preference_overrides.clone();
        overrides.extend(judgment.preference_updates.clone());
        update.preference_overrides = Some(overrides);
    }

    // A stated budget steers the next scout pass.
    if judgment.loop_step == LoopStep::MarketScout {
        let product = state
            .product_query
            .as_ref()
            .map(|p| p.canonical_name.clone())
            .unwrap_or_else(|| state.user_query.clone());
        let retry_query = match judgment.budget_limit {
            Some(budget) => format!("best {} alternatives under ${:.0}", product, budget),
            None => format!("best alternatives to {}", product),
        };
        update.skeptic_feedback_query = Some(retry_query);
    }

    append_history(ctx, state, &judgment.reply, &mut update).await;

    // A chat-only turn is terminal; carry the reply out as the payload.
    if judgment.loop_step == LoopStep::End {
        let existing = state.final_recommendation.clone();
        update.final_recommendation = Some(FinalRecommendation {
            recommendation: state
                .analysis_object
                .as_ref()
                .map(|a| a.recommended_name.clone())
                .or_else(|| existing.as_ref().map(|f| f.recommendation.clone()))
                .unwrap_or_default(),
            confidence: existing.as_ref().map(|f| f.confidence).unwrap_or(0.5),
            reasoning: existing.map(|f| f.reasoning).unwrap_or_default(),
            price_verdict: state
                .analysis_object
                .as_ref()
                .map(|a| a.price_verdict.clone())
                .unwrap_or_else(|| "Fair Price".to_string()),
            warnings: Vec::new(),
            alternatives: Vec::new(),
            chat_reply: Some(judgment.reply),
        });
    }

    info!(loop_step = ?judgment.loop_step, "Chat turn handled");
    Ok(update)
}

async fn chat_judgment(ctx: &PipelineContext, state: &RunState) -> Option<ChatJudgment> {
    let mut history_lines: Vec<String> = state
        .chat_history
        .iter()
        .rev()
        .take(HISTORY_WINDOW)
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect();
    history_lines.reverse();

    let product = state
        .product_query
        .as_ref()
        .map(|p| p.canonical_name.as_str())
        .unwrap_or("(no product identified yet)");

    let analysis_excerpt = state
        .analysis_object
        .as_ref()
        .and_then(|a| serde_json::to_string(a).ok())
        .map(|s| s.chars().take(ANALYSIS_EXCERPT_CHARS).collect::<String>())
        .unwrap_or_else(|| "(no analysis yet)".to_string());

    let user_message = format!(
        "Product under discussion: {}\n\nAnalysis excerpt:\n{}\n\nRecent conversation:\n{}\n\nUser: {}",
        product,
        analysis_excerpt,
        if history_lines.is_empty() {
            "(none)".to_string()
        } else {
            history_lines.join("\n")
        },
        state.user_query,
    );

    let messages = vec![Message::system(CHAT_PROMPT), Message::user(user_message)];

    let completion = match ctx.llm.complete(&ctx.models.chat, messages).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Chat judgment call failed");
            return None;
        }
    };

    extract_json_from_completion(&completion)
        .map_err(|e| e.to_string())
        .and_then(|json| serde_json::from_str::<ChatJudgment>(json).map_err(|e| e.to_string()))
        .map_err(|e| {
            warn!(error = %e, "Chat judgment unparseable");
        })
        .ok()
}

/// Merge stated preference updates into the user's saved explicit weights.
async fn persist_preferences(
    ctx: &PipelineContext,
    state: &RunState,
    updates: &HashMap<String, f64>,
) {
    let mut saved = match ctx.storage.get_explicit_preferences(&state.user_id).await {
        Ok(Some(saved)) => saved,
        Ok(None) => HashMap::new(),
        Err(e) => {
            warn!(error = %e, "Could not load saved preferences, starting fresh");
            HashMap::new()
        }
    };
    for (k, v) in updates {
        saved.insert(k.clone(), v.clamp(0.0, 1.0));
    }
    if let Err(e) = ctx
        .storage
        .save_explicit_preferences(&state.user_id, &saved)
        .await
    {
        warn!(error = %e, "Could not persist preference updates");
    } else {
        debug!(updates = updates.len(), "Persisted preference updates");
    }
}

/// Append the user turn and the reply to the persisted history and to the
/// in-state history.
async fn append_history(
    ctx: &PipelineContext,
    state: &RunState,
    reply: &str,
    update: &mut StateUpdate,
) {
    let user_msg = ChatMessage::new(&state.conversation_id, "user", &state.user_query);
    let assistant_msg = ChatMessage::new(&state.conversation_id, "assistant", reply);

    for msg in [&user_msg, &assistant_msg] {
        if let Err(e) = ctx.storage.append_chat_message(msg).await {
            warn!(error = %e, "Could not persist chat message");
        }
    }

    let mut history = state.chat_history.clone();
    history.push(user_msg);
    history.push(assistant_msg);
    update.chat_history = Some(history);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_context;
    use crate::llm::MockChatCompleter;
    use crate::sources::IdentifiedProduct;

    fn state_with_product() -> RunState {
        let mut state = RunState::new("conv-1", "is it waterproof?");
        state.user_id = "user-1".to_string();
        state.skip_vision = true;
        state.product_query = Some(IdentifiedProduct {
            canonical_name: "Sony WH-1000XM5".to_string(),
            confidence: 0.9,
            source_tag: "test".to_string(),
            link: None,
        });
        state
    }

    #[tokio::test]
    async fn test_chat_only_turn_ends_with_reply_payload() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete().returning(|_, _| {
            Ok(r#"{"reply": "No, it is not rated for water.", "loop_step": "end"}"#.to_string())
        });
        let ctx = test_context(mock);

        let update = run(&ctx, &state_with_product()).await.unwrap();

        assert_eq!(update.loop_step, Some(LoopStep::End));
        let payload = update.final_recommendation.unwrap();
        assert_eq!(
            payload.chat_reply.as_deref(),
            Some("No, it is not rated for water.")
        );
    }

    #[tokio::test]
    async fn test_budget_request_reenters_market_scout() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete().returning(|_, _| {
            Ok(r#"{
                "reply": "Let me look for options under $100.",
                "loop_step": "market_scout",
                "budget_limit": 100
            }"#
            .to_string())
        });
        let ctx = test_context(mock);

        let update = run(&ctx, &state_with_product()).await.unwrap();

        assert_eq!(update.loop_step, Some(LoopStep::MarketScout));
        assert_eq!(
            update.skeptic_feedback_query.as_deref(),
            Some("best Sony WH-1000XM5 alternatives under $100")
        );
        // Not a terminal turn: the payload comes from the re-entered stages.
        assert!(update.final_recommendation.is_none());
    }

    #[tokio::test]
    async fn test_preference_updates_persisted_and_applied() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete().returning(|_, _| {
            Ok(r#"{
                "reply": "Noted, I will favor eco-friendly options.",
                "loop_step": "analysis",
                "preference_updates": {"eco_friendly": 0.9}
            }"#
            .to_string())
        });
        let ctx = test_context(mock);

        let state = state_with_product();
        let update = run(&ctx, &state).await.unwrap();

        assert_eq!(update.loop_step, Some(LoopStep::Analysis));
        let overrides = update.preference_overrides.unwrap();
        assert_eq!(overrides.get("eco_friendly"), Some(&0.9));

        let saved = ctx
            .storage
            .get_explicit_preferences("user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.get("eco_friendly"), Some(&0.9));
    }

    #[tokio::test]
    async fn test_unparseable_judgment_ends_turn_gracefully() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete()
            .returning(|_, _| Ok("sure thing!".to_string()));
        let ctx = test_context(mock);

        let update = run(&ctx, &state_with_product()).await.unwrap();

        assert_eq!(update.loop_step, Some(LoopStep::End));
        let payload = update.final_recommendation.unwrap();
        assert!(payload.chat_reply.unwrap().contains("rephrase"));
    }

    #[tokio::test]
    async fn test_history_appended_for_both_sides() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete().returning(|_, _| {
            Ok(r#"{"reply": "Yes.", "loop_step": "end"}"#.to_string())
        });
        let ctx = test_context(mock);

        let update = run(&ctx, &state_with_product()).await.unwrap();

        let history = update.chat_history.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");

        let persisted = ctx.storage.get_chat_history("conv-1", 10).await.unwrap();
        assert_eq!(persisted.len(), 2);
    }
}
