//! Final response formulation.
//!
//! An LLM turns the analysis and risk report into the terminal payload.
//! When the judgment fails or does not parse, the payload is assembled
//! deterministically from the analysis data instead; the worst case is a
//! neutral low-confidence recommendation, never a raw error.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::NodeError;
use crate::graph::state::{
    AlternativeNote, AnalysisObject, FinalRecommendation, RiskReport, RunState, StateUpdate,
};
use crate::graph::PipelineContext;
use crate::llm::{extract_json_from_completion, Message};
use crate::prompts::RESPONSE_PROMPT;

#[derive(Serialize)]
struct ResponseContext<'a> {
    analysis: Option<&'a AnalysisObject>,
    risk_report: Option<&'a RiskReport>,
    market_warning: Option<&'a str>,
    user_query: &'a str,
}

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    let context = ResponseContext {
        analysis: state.analysis_object.as_ref(),
        risk_report: state.risk_report.as_ref(),
        market_warning: state.market_warning.as_deref(),
        user_query: &state.user_query,
    };
    let context_json =
        serde_json::to_string_pretty(&context).map_err(|e| NodeError::Collaborator {
            message: format!("response context not serializable: {}", e),
        })?;

    let messages = vec![
        Message::system(RESPONSE_PROMPT),
        Message::user(format!("Pipeline data:\n{}", context_json)),
    ];

    let mut payload = match ctx.llm.complete(&ctx.models.response, messages).await {
        Ok(completion) => match extract_json_from_completion(&completion)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                serde_json::from_str::<FinalRecommendation>(json).map_err(|e| e.to_string())
            }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Response judgment unparseable, building fallback payload");
                fallback_payload(state)
            }
        },
        Err(e) => {
            warn!(error = %e, "Response judgment call failed, building fallback payload");
            fallback_payload(state)
        }
    };

    // The market warning always reaches the user, whichever path built
    // the payload.
    if let Some(warning) = &state.market_warning {
        if !payload.warnings.iter().any(|w| w == warning) {
            payload.warnings.push(warning.clone());
        }
    }

    info!(
        recommendation = %payload.recommendation,
        confidence = payload.confidence,
        "Response formulated"
    );

    Ok(StateUpdate {
        final_recommendation: Some(payload),
        ..Default::default()
    })
}

/// Deterministic payload from analysis and risk data alone.
fn fallback_payload(state: &RunState) -> FinalRecommendation {
    let Some(analysis) = &state.analysis_object else {
        // Nothing usable anywhere: neutral low-confidence recommendation.
        return FinalRecommendation {
            recommendation: state
                .product_query
                .as_ref()
                .map(|p| p.canonical_name.clone())
                .unwrap_or_else(|| "No recommendation available".to_string()),
            confidence: 0.2,
            reasoning: "Not enough market data was gathered to make a confident recommendation."
                .to_string(),
            price_verdict: "Fair Price".to_string(),
            warnings: Vec::new(),
            alternatives: Vec::new(),
            chat_reply: None,
        };
    };

    let recommended = analysis
        .ranked
        .iter()
        .find(|c| c.name == analysis.recommended_name);

    let mut reasoning = match recommended {
        Some(pick) => format!(
            "{} scored {:.1}/100 against the user's preferences.",
            pick.name, pick.score_details.total_score
        ),
        None => "Scored against the user's preferences.".to_string(),
    };
    if analysis.better_alternative_found {
        if let Some(top) = analysis.ranked.first() {
            reasoning.push_str(&format!(
                " {} scored higher ({:.1}) and may be the better fit.",
                top.name, top.score_details.total_score
            ));
        }
    }

    let mut warnings = Vec::new();
    if let Some(report) = &state.risk_report {
        if report.risk_level != "low" {
            warnings.extend(report.concerns.iter().cloned());
        }
    }

    let alternatives = analysis
        .ranked
        .iter()
        .filter(|c| !c.is_main)
        .take(3)
        .map(|c| AlternativeNote {
            name: c.name.clone(),
            note: if c.reason.is_empty() {
                format!("Scored {:.1}/100", c.score_details.total_score)
            } else {
                c.reason.clone()
            },
        })
        .collect();

    FinalRecommendation {
        recommendation: analysis.recommended_name.clone(),
        confidence: 0.5,
        reasoning,
        price_verdict: analysis.price_verdict.clone(),
        warnings,
        alternatives,
        chat_reply: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_context;
    use crate::llm::MockChatCompleter;
    use crate::prefs::PreferenceWeights;
    use crate::scoring::{ScoreBreakdown, ScoredCandidate};

    fn scored(name: &str, total: f64, is_main: bool) -> ScoredCandidate {
        ScoredCandidate {
            name: name.to_string(),
            reason: "cheaper with similar reviews".to_string(),
            score_details: ScoreBreakdown {
                trust_score: 6.0,
                sentiment_score: 0.2,
                price_score: 0.6,
                weighted_price: 0.3,
                weighted_quality: 0.25,
                weighted_trust: 0.24,
                eco_score: 0.5,
                total_score: total,
            },
            sentiment_summary: String::new(),
            eco_notes: String::new(),
            is_main,
            price_val: 100.0,
            image_url: None,
            purchase_link: None,
            price_text: None,
        }
    }

    fn state_with_analysis() -> RunState {
        let mut state = RunState::new("conv-1", "q");
        state.analysis_object = Some(AnalysisObject {
            ranked: vec![scored("AltBrand", 70.0, false), scored("MainBrand", 40.0, true)],
            recommended_name: "MainBrand".to_string(),
            market_average: 150.0,
            price_verdict: "Premium Price".to_string(),
            better_alternative_found: true,
            applied_weights: PreferenceWeights::default(),
        });
        state.risk_report = Some(RiskReport {
            summary: "Some battery complaints.".to_string(),
            risk_level: "medium".to_string(),
            concerns: vec!["battery longevity".to_string()],
            counterfeit_risk: false,
            price_anomaly: false,
        });
        state
    }

    #[tokio::test]
    async fn test_llm_payload_used_when_valid() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete().returning(|_, _| {
            Ok(r#"{
                "recommendation": "MainBrand",
                "confidence": 0.8,
                "reasoning": "Holds up well against alternatives.",
                "price_verdict": "Premium Price",
                "warnings": [],
                "alternatives": [{"name": "AltBrand", "note": "cheaper"}]
            }"#
            .to_string())
        });
        let ctx = test_context(mock);

        let update = run(&ctx, &state_with_analysis()).await.unwrap();
        let payload = update.final_recommendation.unwrap();

        assert_eq!(payload.recommendation, "MainBrand");
        assert_eq!(payload.confidence, 0.8);
    }

    #[tokio::test]
    async fn test_fallback_payload_from_analysis_on_parse_failure() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete()
            .returning(|_, _| Ok("Buy it, trust me".to_string()));
        let ctx = test_context(mock);

        let update = run(&ctx, &state_with_analysis()).await.unwrap();
        let payload = update.final_recommendation.unwrap();

        assert_eq!(payload.recommendation, "MainBrand");
        assert_eq!(payload.price_verdict, "Premium Price");
        assert!(payload.reasoning.contains("AltBrand"));
        assert_eq!(payload.warnings, vec!["battery longevity".to_string()]);
        assert_eq!(payload.alternatives.len(), 1);
    }

    #[tokio::test]
    async fn test_neutral_payload_when_nothing_is_available() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete().returning(|_, _| {
            Err(crate::error::LlmError::Unavailable {
                message: "offline".to_string(),
                retries: 2,
            })
        });
        let ctx = test_context(mock);

        let state = RunState::new("conv-1", "q");
        let update = run(&ctx, &state).await.unwrap();
        let payload = update.final_recommendation.unwrap();

        assert!(payload.confidence <= 0.2);
        assert_eq!(payload.price_verdict, "Fair Price");
    }

    #[tokio::test]
    async fn test_market_warning_always_surfaces() {
        let mut mock = MockChatCompleter::new();
        mock.expect_complete().returning(|_, _| {
            Ok(r#"{
                "recommendation": "MainBrand",
                "confidence": 0.8,
                "reasoning": "Fine.",
                "price_verdict": "Fair Price",
                "warnings": [],
                "alternatives": []
            }"#
            .to_string())
        });
        let ctx = test_context(mock);

        let mut state = state_with_analysis();
        state.market_warning = Some("Market results were limited.".to_string());

        let update = run(&ctx, &state).await.unwrap();
        let payload = update.final_recommendation.unwrap();

        assert!(payload
            .warnings
            .contains(&"Market results were limited.".to_string()));
    }
}
