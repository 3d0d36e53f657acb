//! Quality gate over scouted candidates.
//!
//! The gate decides, per search iteration, whether scouted alternatives are
//! good enough to show the user or whether the market scout should run again
//! with a mutated query. Deterministic heuristics run before any LLM
//! judgment so the loop policy holds without network access:
//!
//! - iteration 0: strict, veto generic or irrelevant batches
//! - iteration 1: lenient, veto only scam/unsafe signals
//! - iteration 2 and beyond: forced proceed, optionally with a warning

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::{extract_json_from_completion, ChatCompleter, Message};
use crate::prefs::PreferenceWeights;
use crate::prompts::GATEKEEPER_PROMPT;
use crate::scoring::Candidate;

/// Tokens that mark a candidate as a likely scam or unsafe listing.
const SCAM_TOKENS: &[&str] = &[
    "replica",
    "knockoff",
    "knock-off",
    "counterfeit",
    "1:1 quality",
    "aaa quality",
    "miracle",
    "free money",
];

/// Name prefixes that mark a candidate as a generic no-name listing.
const GENERIC_MARKERS: &[&str] = &["generic", "oem", "universal", "compatible with", "no brand"];

/// The gate's verdict on a candidate batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Veto,
    Proceed,
}

/// Full gate decision, including the mutated query that a veto carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoDecision {
    pub decision: GateAction,
    /// Replacement search query. Always present and non-empty on a veto.
    #[serde(default, rename = "better_search_query")]
    pub mutated_query: Option<String>,
    pub reason: String,
    /// Surfaced to the user when proceeding despite low batch quality.
    #[serde(default)]
    pub market_warning: Option<String>,
}

impl VetoDecision {
    pub fn proceed(reason: impl Into<String>) -> Self {
        Self {
            decision: GateAction::Proceed,
            mutated_query: None,
            reason: reason.into(),
            market_warning: None,
        }
    }

    pub fn veto(mutated_query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            decision: GateAction::Veto,
            mutated_query: Some(mutated_query.into()),
            reason: reason.into(),
            market_warning: None,
        }
    }

    pub fn is_veto(&self) -> bool {
        self.decision == GateAction::Veto
    }
}

/// Gate evaluator. Heuristics first, LLM for the non-obvious middle ground.
pub struct Gatekeeper {
    llm: Arc<dyn ChatCompleter>,
    model: String,
    max_loops: u32,
}

fn name_is_generic(name: &str) -> bool {
    let lower = name.to_lowercase();
    if GENERIC_MARKERS.iter().any(|m| lower.starts_with(m)) {
        return true;
    }
    // Shouty pseudo-brands: a long run of uppercase letters with no digits,
    // the signature of dropshipped listings.
    name.split_whitespace().any(|token| {
        token.len() >= 6 && token.chars().all(|c| c.is_ascii_uppercase())
    })
}

fn name_is_scammy(name: &str) -> bool {
    let lower = name.to_lowercase();
    SCAM_TOKENS.iter().any(|t| lower.contains(t))
}

/// Default query mutation when a veto needs one: steer the next search
/// toward review communities.
fn mutate_query(query: &str) -> String {
    format!("best {} reddit", query.trim())
}

impl Gatekeeper {
    pub fn new(llm: Arc<dyn ChatCompleter>, model: impl Into<String>, max_loops: u32) -> Self {
        Self {
            llm,
            model: model.into(),
            max_loops,
        }
    }

    /// Evaluate a candidate batch for the given 0-based loop count.
    pub async fn evaluate(
        &self,
        query: &str,
        candidates: &[Candidate],
        weights: &PreferenceWeights,
        loop_count: u32,
    ) -> VetoDecision {
        // Ceiling: never veto once the retry budget is spent.
        if loop_count >= self.max_loops {
            let mut decision =
                VetoDecision::proceed("Search retry budget exhausted, showing best available");
            let low_quality = candidates.is_empty()
                || candidates.iter().all(|c| name_is_generic(&c.name))
                || candidates.iter().any(|c| name_is_scammy(&c.name));
            if low_quality {
                decision.market_warning = Some(
                    "Market results were limited; these picks may not be the best available."
                        .to_string(),
                );
            }
            return decision;
        }

        let scam_present = candidates.iter().any(|c| name_is_scammy(&c.name));
        let all_generic =
            candidates.is_empty() || candidates.iter().all(|c| name_is_generic(&c.name));

        // Deterministic screen. Scam signals veto at any pre-ceiling loop;
        // generic batches veto only on the strict first pass.
        if scam_present {
            return self.checked_veto(
                query,
                VetoDecision::veto(
                    mutate_query(query),
                    "Batch contains likely scam or counterfeit listings",
                ),
            );
        }

        if loop_count == 0 && all_generic {
            return self.checked_veto(
                query,
                VetoDecision::veto(
                    mutate_query(query),
                    "All scouted candidates look like generic no-name listings",
                ),
            );
        }

        // Non-obvious case: let the LLM judge, degrade to proceed on any
        // failure so the pipeline keeps moving.
        match self.llm_judgment(query, candidates, weights, loop_count).await {
            Some(decision) if decision.is_veto() => self.checked_veto(query, decision),
            Some(decision) => decision,
            None => VetoDecision::proceed("Gate judgment unavailable, proceeding"),
        }
    }

    /// Guarantee the veto invariant: a veto without a usable mutated query
    /// gets the heuristic mutation instead.
    fn checked_veto(&self, query: &str, mut decision: VetoDecision) -> VetoDecision {
        let usable = decision
            .mutated_query
            .as_deref()
            .map(|q| !q.trim().is_empty())
            .unwrap_or(false);
        if !usable {
            decision.mutated_query = Some(mutate_query(query));
        }
        decision
    }

    async fn llm_judgment(
        &self,
        query: &str,
        candidates: &[Candidate],
        weights: &PreferenceWeights,
        loop_count: u32,
    ) -> Option<VetoDecision> {
        let candidate_lines: Vec<String> = candidates
            .iter()
            .map(|c| {
                let price = c
                    .price_text
                    .clone()
                    .unwrap_or_else(|| format!("${:.2}", c.primary_price()));
                format!("- {} (price: {})", c.name, price)
            })
            .collect();

        let pref_context = if weights.price_sensitivity > 0.7 {
            "The user is budget conscious. Do not veto items just for being cheap generic brands unless they are scams."
        } else if weights.quality > 0.7 {
            "The user wants quality. Veto cheap knockoffs diligently."
        } else {
            "The user has balanced preferences."
        };

        let user_message = format!(
            "Search iteration: {} of {}\nOriginal query: {}\n\nCandidates:\n{}\n\nPreference context: {}",
            loop_count,
            self.max_loops,
            query,
            if candidate_lines.is_empty() {
                "(none found)".to_string()
            } else {
                candidate_lines.join("\n")
            },
            pref_context,
        );

        let messages = vec![
            Message::system(GATEKEEPER_PROMPT),
            Message::user(user_message),
        ];

        let completion = match self.llm.complete(&self.model, messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Gate judgment call failed, proceeding");
                return None;
            }
        };

        let json = match extract_json_from_completion(&completion) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Gate judgment returned no JSON, proceeding");
                return None;
            }
        };

        match serde_json::from_str::<VetoDecision>(json) {
            Ok(decision) => {
                debug!(
                    decision = ?decision.decision,
                    loop_count,
                    "Gate judgment parsed"
                );
                Some(decision)
            }
            Err(e) => {
                warn!(error = %e, "Gate judgment JSON did not match schema, proceeding");
                None
            }
        }
    }
}
