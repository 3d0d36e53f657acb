//! End-to-end tests for the orchestration graph.
//!
//! Runs the whole pipeline against an in-memory database and canned
//! collaborators. The canned LLM dispatches on the system prompt, so each
//! test declares exactly the judgments its path needs; every undeclared
//! judgment fails and must be absorbed by the pipeline's fallbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use shopsage::config::{GraphConfig, ModelConfig};
use shopsage::error::{GraphError, LlmError, LlmResult, SearchError, SearchResult};
use shopsage::graph::state::RunState;
use shopsage::graph::{Graph, NodeId, PipelineContext};
use shopsage::llm::{ChatCompleter, Message};
use shopsage::sources::{
    IdentifiedProduct, MarketSearch, PriceOffer, PriceSource, ProductIdentifier, ReviewSnippet,
    ReviewSource, SearchHit,
};
use shopsage::storage::{SqliteStorage, Storage};

/// Canned completer keyed by a distinguishing phrase of each system prompt.
#[derive(Default)]
struct CannedLlm {
    responses: HashMap<&'static str, String>,
}

impl CannedLlm {
    fn new() -> Self {
        Self::default()
    }

    fn on(mut self, phrase: &'static str, response: &str) -> Self {
        self.responses.insert(phrase, response.to_string());
        self
    }
}

#[async_trait]
impl ChatCompleter for CannedLlm {
    async fn complete(&self, _model: &str, messages: Vec<Message>) -> LlmResult<String> {
        let system = messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        for (phrase, response) in &self.responses {
            if system.contains(phrase) {
                return Ok(response.clone());
            }
        }
        Err(LlmError::Unavailable {
            message: "no canned judgment for this prompt".to_string(),
            retries: 0,
        })
    }
}

/// Identifier that counts how many times identification actually ran.
struct CountingIdentifier {
    product: Option<IdentifiedProduct>,
    calls: AtomicUsize,
}

impl CountingIdentifier {
    fn found(name: &str) -> Arc<Self> {
        Arc::new(Self {
            product: Some(IdentifiedProduct {
                canonical_name: name.to_string(),
                confidence: 0.9,
                source_tag: "visual_search".to_string(),
                link: None,
            }),
            calls: AtomicUsize::new(0),
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            product: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductIdentifier for CountingIdentifier {
    async fn identify(&self, _image_base64: &str) -> SearchResult<IdentifiedProduct> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.product.clone().ok_or(SearchError::Api {
            status: 503,
            message: "visual search down".to_string(),
        })
    }
}

struct StubReviews(Vec<ReviewSnippet>);

#[async_trait]
impl ReviewSource for StubReviews {
    async fn search_reviews(&self, _query: &str) -> SearchResult<Vec<ReviewSnippet>> {
        Ok(self.0.clone())
    }
}

struct StubPrices(Vec<PriceOffer>);

#[async_trait]
impl PriceSource for StubPrices {
    async fn search_prices(&self, _query: &str) -> SearchResult<Vec<PriceOffer>> {
        Ok(self.0.clone())
    }
}

struct StubMarket(Vec<SearchHit>);

#[async_trait]
impl MarketSearch for StubMarket {
    async fn search_context(&self, _query: &str) -> SearchResult<Vec<SearchHit>> {
        Ok(self.0.clone())
    }
}

struct FailingMarket;

#[async_trait]
impl MarketSearch for FailingMarket {
    async fn search_context(&self, _query: &str) -> SearchResult<Vec<SearchHit>> {
        Err(SearchError::Api {
            status: 500,
            message: "market search down".to_string(),
        })
    }
}

fn review() -> ReviewSnippet {
    ReviewSnippet {
        source: "rtings.com".to_string(),
        snippet: "Class-leading noise cancellation, battery holds up.".to_string(),
        url: "https://example.com/review".to_string(),
        rating: Some(4.5),
        date: None,
    }
}

fn offer(price_cents: i64) -> PriceOffer {
    PriceOffer {
        vendor: "Acme Electronics".to_string(),
        price_cents,
        currency: "CAD".to_string(),
        url: "https://example.com/buy".to_string(),
        thumbnail: None,
    }
}

fn roundup_hit() -> SearchHit {
    SearchHit {
        title: "Best noise cancelling headphones 2026".to_string(),
        url: "https://example.com/roundup".to_string(),
        content: "The Bose QuietComfort Ultra and Anker Soundcore Q45 both undercut it."
            .to_string(),
    }
}

const CREDIBLE_CANDIDATES: &str = r#"{"candidates": [
    {"name": "Bose QuietComfort Ultra", "reason": "stronger ANC at a similar price"},
    {"name": "Anker Soundcore Q45", "reason": "most of the features for half the price"}
]}"#;

const GENERIC_CANDIDATES: &str = r#"{"candidates": [
    {"name": "QZWXKL Earbuds Pro", "reason": "very cheap"},
    {"name": "Generic bluetooth headset", "reason": "very cheap"}
]}"#;

const SCAM_CANDIDATES: &str = r#"{"candidates": [
    {"name": "AirPods Pro replica 1:1 quality", "reason": "looks identical"}
]}"#;

const GATE_PROCEED: &str = r#"{"decision": "proceed", "reason": "credible branded batch"}"#;

const ANALYST_JUDGMENT: &str = r#"{
    "summary": "Reviews are broadly positive.",
    "trust_score": 7.0,
    "sentiment_score": 0.4,
    "eco_score": 0.5,
    "eco_notes": "",
    "verdict": "well regarded"
}"#;

const LOW_RISK_REPORT: &str = r#"{
    "summary": "No credible risk signals in the gathered data.",
    "risk_level": "low",
    "concerns": [],
    "counterfeit_risk": false,
    "price_anomaly": false
}"#;

async fn build_pipeline(
    llm: CannedLlm,
    identifier: Arc<CountingIdentifier>,
    market: Arc<dyn MarketSearch>,
) -> (Graph, Arc<SqliteStorage>) {
    let storage = Arc::new(
        SqliteStorage::new_in_memory()
            .await
            .expect("in-memory storage"),
    );
    let graph = Graph::new(PipelineContext::new(
        Arc::new(llm),
        identifier,
        Arc::new(StubReviews(vec![review()])),
        Arc::new(StubPrices(vec![offer(10000)])),
        market,
        storage.clone(),
        ModelConfig::default(),
        GraphConfig::default(),
    ));
    (graph, storage)
}

fn photo_turn(conversation_id: &str) -> RunState {
    RunState::new(conversation_id, "what is this and is it worth it?")
        .with_user_id("user-1")
        .with_image("aGVsbG8=")
}

#[tokio::test]
async fn test_photo_turn_runs_the_full_pipeline() {
    let llm = CannedLlm::new()
        .on("market scout", CREDIBLE_CANDIDATES)
        .on("gatekeeper", GATE_PROCEED)
        .on("review analyst", ANALYST_JUDGMENT)
        .on("skeptical product researcher", LOW_RISK_REPORT);
    let identifier = CountingIdentifier::found("Sony WH-1000XM5");
    let (graph, storage) = build_pipeline(
        llm,
        identifier.clone(),
        Arc::new(StubMarket(vec![roundup_hit()])),
    )
    .await;

    let state = graph
        .run(NodeId::Router, photo_turn("conv-e2e"))
        .await
        .unwrap();

    assert_eq!(
        state.product_query.as_ref().unwrap().canonical_name,
        "Sony WH-1000XM5"
    );
    let scout = state.market_scout_data.as_ref().unwrap();
    assert_eq!(scout.candidates.len(), 2);
    assert!(!state.skeptic_decision.as_ref().unwrap().is_veto());
    assert_eq!(state.risk_report.as_ref().unwrap().risk_level, "low");

    // Main product plus both alternatives were scored; the main product
    // stays recommended when nothing outranks it decisively.
    let analysis = state.analysis_object.as_ref().unwrap();
    assert_eq!(analysis.ranked.len(), 3);
    assert_eq!(analysis.recommended_name, "Sony WH-1000XM5");

    // The response judgment was not canned, so the payload is the
    // deterministic assembly from the analysis.
    let payload = state.final_recommendation.as_ref().unwrap();
    assert_eq!(payload.recommendation, "Sony WH-1000XM5");
    assert_eq!(payload.alternatives.len(), 2);

    for node in [
        "router",
        "vision",
        "research",
        "market_scout",
        "gatekeeper",
        "critique",
        "analysis",
        "response",
    ] {
        assert!(state.node_timings.contains_key(node), "missing timing: {}", node);
    }

    // The resumable sub-state was persisted for follow-up turns.
    let snapshot = storage.load_snapshot("conv-e2e").await.unwrap().unwrap();
    assert!(snapshot.product_query.is_some());
    assert!(snapshot.analysis_object.is_some());
}

#[tokio::test]
async fn test_generic_batch_is_vetoed_then_accepted_on_retry() {
    // The scout keeps extracting the same no-name batch. The strict first
    // gate pass vetoes it; the lenient second pass lets it through.
    let llm = CannedLlm::new()
        .on("market scout", GENERIC_CANDIDATES)
        .on("gatekeeper", GATE_PROCEED)
        .on("review analyst", ANALYST_JUDGMENT)
        .on("skeptical product researcher", LOW_RISK_REPORT);
    let (graph, _storage) = build_pipeline(
        llm,
        CountingIdentifier::found("Sony WH-1000XM5"),
        Arc::new(StubMarket(vec![roundup_hit()])),
    )
    .await;

    let state = graph
        .run(NodeId::Router, photo_turn("conv-veto"))
        .await
        .unwrap();

    assert_eq!(state.skeptic_loop_count, 1);
    assert!(!state.skeptic_decision.as_ref().unwrap().is_veto());
    // The retry ran with the gate's mutated query.
    assert!(state
        .market_scout_data
        .as_ref()
        .unwrap()
        .search_query
        .contains("reddit"));
    assert!(state.final_recommendation.is_some());
}

#[tokio::test]
async fn test_retry_ceiling_forces_proceed_with_warning() {
    // Scam listings get vetoed on both pre-ceiling passes; at the ceiling
    // the gate proceeds anyway and the warning reaches the final payload.
    let llm = CannedLlm::new()
        .on("market scout", SCAM_CANDIDATES)
        .on("review analyst", ANALYST_JUDGMENT)
        .on("skeptical product researcher", LOW_RISK_REPORT);
    let (graph, _storage) = build_pipeline(
        llm,
        CountingIdentifier::found("AirPods Pro 2"),
        Arc::new(StubMarket(vec![roundup_hit()])),
    )
    .await;

    let state = graph
        .run(NodeId::Router, photo_turn("conv-ceiling"))
        .await
        .unwrap();

    assert_eq!(state.skeptic_loop_count, 2);
    assert!(!state.skeptic_decision.as_ref().unwrap().is_veto());

    let warning = state.market_warning.as_ref().expect("forced proceed warns");
    let payload = state.final_recommendation.as_ref().unwrap();
    assert!(payload.warnings.contains(warning));
}

#[tokio::test]
async fn test_followup_turn_never_reenters_identification() {
    let llm = CannedLlm::new()
        .on("market scout", CREDIBLE_CANDIDATES)
        .on("gatekeeper", GATE_PROCEED)
        .on("review analyst", ANALYST_JUDGMENT)
        .on("skeptical product researcher", LOW_RISK_REPORT)
        .on("intent router", r#"{"intent": "chat"}"#)
        .on(
            "ongoing conversation",
            r#"{"reply": "Yes, it holds up well against both alternatives.", "loop_step": "end"}"#,
        );
    let identifier = CountingIdentifier::found("Sony WH-1000XM5");
    let (graph, storage) = build_pipeline(
        llm,
        identifier.clone(),
        Arc::new(StubMarket(vec![roundup_hit()])),
    )
    .await;

    // First turn: full pipeline from a photo.
    graph
        .run(NodeId::Router, photo_turn("conv-followup"))
        .await
        .unwrap();
    assert_eq!(identifier.calls(), 1);

    // Follow-up turn: resumed from the persisted snapshot, no image.
    let snapshot = storage
        .load_snapshot("conv-followup")
        .await
        .unwrap()
        .unwrap();
    let history = storage.get_chat_history("conv-followup", 20).await.unwrap();
    let resumed = RunState::resume("conv-followup", "is it worth it?", &snapshot, history)
        .with_user_id("user-1");

    let state = graph.run(NodeId::Router, resumed).await.unwrap();

    assert_eq!(identifier.calls(), 1, "identification must not run again");
    assert!(!state.node_timings.contains_key("vision"));
    assert_eq!(
        state.product_query.as_ref().unwrap().canonical_name,
        "Sony WH-1000XM5"
    );
    let payload = state.final_recommendation.as_ref().unwrap();
    assert!(payload.chat_reply.as_ref().unwrap().contains("holds up"));

    // Both sides of the exchange were persisted.
    let history = storage.get_chat_history("conv-followup", 20).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_budget_followup_reenters_the_market_scout() {
    let llm = CannedLlm::new()
        .on("intent router", r#"{"intent": "chat"}"#)
        .on(
            "ongoing conversation",
            r#"{"reply": "Let me find cheaper options.", "loop_step": "market_scout", "budget_limit": 100}"#,
        )
        .on("market scout", CREDIBLE_CANDIDATES)
        .on("gatekeeper", GATE_PROCEED)
        .on("review analyst", ANALYST_JUDGMENT)
        .on("skeptical product researcher", LOW_RISK_REPORT);
    let (graph, _storage) = build_pipeline(
        llm,
        CountingIdentifier::found("Sony WH-1000XM5"),
        Arc::new(StubMarket(vec![roundup_hit()])),
    )
    .await;

    let mut state = RunState::new("conv-budget", "anything cheaper?").with_user_id("user-1");
    state.skip_vision = true;
    state.product_query = Some(IdentifiedProduct {
        canonical_name: "Sony WH-1000XM5".to_string(),
        confidence: 0.9,
        source_tag: "visual_search".to_string(),
        link: None,
    });

    let state = graph.run(NodeId::Router, state).await.unwrap();

    assert_eq!(
        state.market_scout_data.as_ref().unwrap().search_query,
        "best Sony WH-1000XM5 alternatives under $100"
    );
    assert!(!state.node_timings.contains_key("vision"));
    assert!(state.node_timings.contains_key("chat"));
    assert!(state.node_timings.contains_key("response"));
    assert!(state.final_recommendation.is_some());
}

#[tokio::test]
async fn test_identification_failure_aborts_the_run() {
    // Visual search is down and no vision judgment is canned: the only
    // fatal node failure in the graph.
    let (graph, _storage) = build_pipeline(
        CannedLlm::new(),
        CountingIdentifier::unavailable(),
        Arc::new(StubMarket(vec![roundup_hit()])),
    )
    .await;

    let result = graph.run(NodeId::Router, photo_turn("conv-fatal")).await;

    assert!(matches!(
        result,
        Err(GraphError::IdentificationFailed { .. })
    ));
}

#[tokio::test]
async fn test_run_completes_with_every_judgment_unavailable() {
    // Market search down, every LLM judgment failing: the run still ends
    // with a schema-valid payload built from fallbacks alone.
    let (graph, _storage) = build_pipeline(
        CannedLlm::new(),
        CountingIdentifier::found("Sony WH-1000XM5"),
        Arc::new(FailingMarket),
    )
    .await;

    let state = graph
        .run(NodeId::Router, photo_turn("conv-degraded"))
        .await
        .unwrap();

    // Empty batch vetoed on the strict pass, accepted on the lenient one.
    assert_eq!(state.skeptic_loop_count, 1);

    // Critique degraded to the unverified report, and its concerns were
    // carried into the payload warnings.
    let report = state.risk_report.as_ref().unwrap();
    assert_eq!(report.risk_level, "medium");

    let payload = state.final_recommendation.as_ref().unwrap();
    assert_eq!(payload.recommendation, "Sony WH-1000XM5");
    assert!(!payload.warnings.is_empty());
}
