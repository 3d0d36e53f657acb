//! Run state and the partial-update reducer.
//!
//! A pipeline run carries one [`RunState`]: inputs, per-stage outputs as
//! explicit `Option` fields, and routing control fields. Nodes never mutate
//! the state directly; they return a [`StateUpdate`] that the engine merges
//! through [`RunState::apply`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::gate::VetoDecision;
use crate::prefs::PreferenceWeights;
use crate::scoring::{Candidate, ScoredCandidate};
use crate::sources::{IdentifiedProduct, PriceOffer, ReviewSnippet};
use crate::storage::{ChatMessage, ConversationSnapshot};

/// Router intent classification for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterIntent {
    VisionSearch,
    Chat,
    UpdatePreferences,
    MarketScoutSearch,
}

/// Targeted re-entry point chosen by the chat node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStep {
    End,
    MarketScout,
    Analysis,
}

/// Reviews and price offers gathered for the main product.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchData {
    pub reviews: Vec<ReviewSnippet>,
    pub prices: Vec<PriceOffer>,
}

/// Scouted alternatives plus the query that produced them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketScoutData {
    pub candidates: Vec<Candidate>,
    pub search_query: String,
}

/// Risk report from the critique stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub summary: String,
    pub risk_level: String,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub counterfeit_risk: bool,
    #[serde(default)]
    pub price_anomaly: bool,
}

impl RiskReport {
    /// Deterministic fallback when the critique judgment is unavailable.
    pub fn unverified() -> Self {
        Self {
            summary: "Product risks could not be verified from available data.".to_string(),
            risk_level: "medium".to_string(),
            concerns: vec!["Automated risk analysis was unavailable for this run.".to_string()],
            counterfeit_risk: false,
            price_anomaly: false,
        }
    }
}

/// Per-candidate review judgment produced during analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAnalysis {
    #[serde(default)]
    pub summary: String,
    pub trust_score: f64,
    pub sentiment_score: f64,
    #[serde(default = "neutral_eco")]
    pub eco_score: f64,
    #[serde(default)]
    pub eco_notes: String,
    #[serde(default)]
    pub red_flags: Vec<String>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub verdict: String,
}

fn neutral_eco() -> f64 {
    0.5
}

impl Default for ReviewAnalysis {
    fn default() -> Self {
        Self {
            summary: "No reviews found".to_string(),
            trust_score: 5.0,
            sentiment_score: 0.0,
            eco_score: 0.5,
            eco_notes: String::new(),
            red_flags: Vec::new(),
            pros: Vec::new(),
            cons: Vec::new(),
            verdict: "No reviews found".to_string(),
        }
    }
}

/// Assembled output of the analysis stage: scored, ranked, annotated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisObject {
    pub ranked: Vec<ScoredCandidate>,
    pub recommended_name: String,
    pub market_average: f64,
    pub price_verdict: String,
    pub better_alternative_found: bool,
    pub applied_weights: PreferenceWeights,
}

/// One alternative mentioned in the final payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativeNote {
    pub name: String,
    pub note: String,
}

/// Terminal recommendation payload. Always schema-valid, even on fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRecommendation {
    pub recommendation: String,
    pub confidence: f64,
    pub reasoning: String,
    pub price_verdict: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<AlternativeNote>,
    #[serde(default)]
    pub chat_reply: Option<String>,
}

/// The full state threaded through one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    // Identity and inputs.
    pub conversation_id: String,
    /// Preference scope; outlives individual conversations.
    #[serde(default)]
    pub user_id: String,
    pub user_query: String,
    pub image_base64: Option<String>,
    #[serde(default)]
    pub preference_overrides: HashMap<String, f64>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,

    // Stage outputs.
    pub product_query: Option<IdentifiedProduct>,
    pub research_data: Option<ResearchData>,
    pub market_scout_data: Option<MarketScoutData>,
    pub risk_report: Option<RiskReport>,
    pub analysis_object: Option<AnalysisObject>,
    pub alternatives_analysis: Option<Vec<ReviewAnalysis>>,
    pub final_recommendation: Option<FinalRecommendation>,

    // Control fields.
    pub router_decision: Option<RouterIntent>,
    pub loop_step: Option<LoopStep>,
    pub skeptic_decision: Option<VetoDecision>,
    pub skeptic_feedback_query: Option<String>,
    #[serde(default)]
    pub skeptic_loop_count: u32,
    pub market_warning: Option<String>,
    #[serde(default)]
    pub detect_only: bool,
    #[serde(default)]
    pub skip_vision: bool,

    /// Per-node wall time in milliseconds.
    #[serde(default)]
    pub node_timings: HashMap<String, f64>,
}

impl RunState {
    /// Fresh state for a first turn.
    pub fn new(conversation_id: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_query: user_query.into(),
            ..Default::default()
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_image(mut self, image_base64: impl Into<String>) -> Self {
        self.image_base64 = Some(image_base64.into());
        self
    }

    pub fn with_preference_overrides(mut self, overrides: HashMap<String, f64>) -> Self {
        self.preference_overrides = overrides;
        self
    }

    pub fn with_detect_only(mut self, detect_only: bool) -> Self {
        self.detect_only = detect_only;
        self
    }

    /// Resume state for a follow-up turn. Re-injects persisted stage
    /// outputs and disables the identification path.
    pub fn resume(
        conversation_id: impl Into<String>,
        user_query: impl Into<String>,
        snapshot: &ConversationSnapshot,
        chat_history: Vec<ChatMessage>,
    ) -> Self {
        let mut state = Self::new(conversation_id, user_query);
        state.skip_vision = true;
        state.chat_history = chat_history;
        state.product_query = decode_stage(&snapshot.product_query, "product_query");
        state.market_scout_data = decode_stage(&snapshot.market_scout_data, "market_scout_data");
        state.research_data = decode_stage(&snapshot.research_data, "research_data");
        state.risk_report = decode_stage(&snapshot.risk_report, "risk_report");
        state.analysis_object = decode_stage(&snapshot.analysis_object, "analysis_object");
        state
    }

    /// Serialize the resumable sub-state for persistence.
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.conversation_id.clone(),
            product_query: encode_stage(&self.product_query),
            market_scout_data: encode_stage(&self.market_scout_data),
            research_data: encode_stage(&self.research_data),
            risk_report: encode_stage(&self.risk_report),
            analysis_object: encode_stage(&self.analysis_object),
        }
    }

    /// Merge a partial update into the state.
    ///
    /// Every field overwrites when present; `node_timings` merges at key
    /// level so earlier timings are never erased.
    pub fn apply(&mut self, update: StateUpdate) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(value) = update.$field {
                    self.$field = Some(value);
                }
            };
        }

        take!(product_query);
        take!(research_data);
        take!(market_scout_data);
        take!(risk_report);
        take!(analysis_object);
        take!(alternatives_analysis);
        take!(final_recommendation);
        take!(router_decision);
        take!(loop_step);
        take!(skeptic_decision);
        take!(skeptic_feedback_query);
        take!(market_warning);

        if let Some(count) = update.skeptic_loop_count {
            self.skeptic_loop_count = count;
        }
        if let Some(query) = update.user_query {
            self.user_query = query;
        }
        if let Some(overrides) = update.preference_overrides {
            self.preference_overrides = overrides;
        }
        if let Some(history) = update.chat_history {
            self.chat_history = history;
        }

        for (node, elapsed) in update.node_timings {
            self.node_timings.insert(node, elapsed);
        }
    }
}

fn decode_stage<T: serde::de::DeserializeOwned>(
    value: &Option<serde_json::Value>,
    field: &str,
) -> Option<T> {
    let value = value.as_ref()?;
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(field, error = %e, "Dropping undecodable snapshot field");
            None
        }
    }
}

fn encode_stage<T: Serialize>(value: &Option<T>) -> Option<serde_json::Value> {
    value.as_ref().and_then(|v| serde_json::to_value(v).ok())
}

/// Partial state update returned by a node. Absent fields leave the state
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub product_query: Option<IdentifiedProduct>,
    pub research_data: Option<ResearchData>,
    pub market_scout_data: Option<MarketScoutData>,
    pub risk_report: Option<RiskReport>,
    pub analysis_object: Option<AnalysisObject>,
    pub alternatives_analysis: Option<Vec<ReviewAnalysis>>,
    pub final_recommendation: Option<FinalRecommendation>,
    pub router_decision: Option<RouterIntent>,
    pub loop_step: Option<LoopStep>,
    pub skeptic_decision: Option<VetoDecision>,
    pub skeptic_feedback_query: Option<String>,
    pub skeptic_loop_count: Option<u32>,
    pub market_warning: Option<String>,
    pub user_query: Option<String>,
    pub preference_overrides: Option<HashMap<String, f64>>,
    pub chat_history: Option<Vec<ChatMessage>>,
    pub node_timings: HashMap<String, f64>,
}

impl StateUpdate {
    /// The do-nothing update a failed node degrades to.
    pub fn empty() -> Self {
        Self::default()
    }
}
