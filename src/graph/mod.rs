//! The orchestration graph: an explicit state machine over stage nodes.
//!
//! Control flow lives in one match table, [`route_after`], not in the
//! nodes. The engine executes nodes, merges their partial updates, records
//! per-node wall time, and converts node failures into empty updates; the
//! only fatal node failure is identification at entry, since nothing
//! downstream can run without a product.

pub mod nodes;
pub mod state;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::cache::ResultCache;
use crate::config::{GraphConfig, ModelConfig};
use crate::error::GraphError;
use crate::gate::GateAction;
use crate::llm::ChatCompleter;
use crate::prefs::PreferenceResolver;
use crate::sources::{MarketSearch, PriceSource, ProductIdentifier, ReviewSource};
use crate::storage::Storage;
use state::{LoopStep, RouterIntent, RunState, StateUpdate};

/// Hard ceiling on executed steps per run; exceeding it means the route
/// table has a cycle.
const MAX_STEPS: usize = 32;

/// Every node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Router,
    Vision,
    Research,
    MarketScout,
    Gatekeeper,
    Critique,
    Analysis,
    Response,
    Chat,
}

impl NodeId {
    /// Stable name used for timings and logs.
    pub fn name(&self) -> &'static str {
        match self {
            NodeId::Router => "router",
            NodeId::Vision => "vision",
            NodeId::Research => "research",
            NodeId::MarketScout => "market_scout",
            NodeId::Gatekeeper => "gatekeeper",
            NodeId::Critique => "critique",
            NodeId::Analysis => "analysis",
            NodeId::Response => "response",
            NodeId::Chat => "chat",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the engine goes after a node completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Next(NodeId),
    /// Run branches concurrently on snapshots of the state, merge their
    /// updates in declaration order, then continue at `join`.
    FanOut { branches: Vec<NodeId>, join: NodeId },
    End,
}

/// The routing table. Total over nodes: unknown or missing state values
/// fall through to defined defaults, never to an error.
pub fn route_after(node: NodeId, state: &RunState, config: &GraphConfig) -> Route {
    match node {
        NodeId::Router => match state.router_decision {
            Some(RouterIntent::VisionSearch) | None => Route::Next(NodeId::Vision),
            Some(RouterIntent::MarketScoutSearch) => Route::Next(NodeId::MarketScout),
            Some(RouterIntent::Chat) | Some(RouterIntent::UpdatePreferences) => {
                Route::Next(NodeId::Chat)
            }
        },
        NodeId::Vision => {
            if state.detect_only {
                Route::End
            } else {
                Route::FanOut {
                    branches: vec![NodeId::Research, NodeId::MarketScout],
                    join: NodeId::Gatekeeper,
                }
            }
        }
        NodeId::Research | NodeId::MarketScout => Route::Next(NodeId::Gatekeeper),
        NodeId::Gatekeeper => {
            let vetoed = state
                .skeptic_decision
                .as_ref()
                .map(|d| d.decision == GateAction::Veto)
                .unwrap_or(false);
            // The gate never vetoes at the ceiling; the count check is the
            // engine's own belt against a miswired gate.
            if vetoed && state.skeptic_loop_count <= config.max_gate_retries {
                Route::Next(NodeId::MarketScout)
            } else {
                Route::FanOut {
                    branches: vec![NodeId::Critique, NodeId::Analysis],
                    join: NodeId::Response,
                }
            }
        }
        NodeId::Critique | NodeId::Analysis => Route::Next(NodeId::Response),
        NodeId::Response => Route::End,
        NodeId::Chat => match state.loop_step {
            Some(LoopStep::MarketScout) => Route::Next(NodeId::MarketScout),
            Some(LoopStep::Analysis) => Route::Next(NodeId::Analysis),
            Some(LoopStep::End) | None => Route::End,
        },
    }
}

/// Shared collaborators handed to every node.
#[derive(Clone)]
pub struct PipelineContext {
    pub llm: Arc<dyn ChatCompleter>,
    pub identifier: Arc<dyn ProductIdentifier>,
    pub reviews: Arc<dyn ReviewSource>,
    pub prices: Arc<dyn PriceSource>,
    pub market: Arc<dyn MarketSearch>,
    pub storage: Arc<dyn Storage>,
    pub cache: ResultCache,
    pub prefs: PreferenceResolver,
    pub models: ModelConfig,
    pub graph: GraphConfig,
}

impl PipelineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn ChatCompleter>,
        identifier: Arc<dyn ProductIdentifier>,
        reviews: Arc<dyn ReviewSource>,
        prices: Arc<dyn PriceSource>,
        market: Arc<dyn MarketSearch>,
        storage: Arc<dyn Storage>,
        models: ModelConfig,
        graph: GraphConfig,
    ) -> Self {
        Self {
            llm,
            identifier,
            reviews,
            prices,
            market,
            cache: ResultCache::new(storage.clone()),
            prefs: PreferenceResolver::new(storage.clone()),
            storage,
            models,
            graph,
        }
    }
}

/// The graph engine.
pub struct Graph {
    ctx: PipelineContext,
}

impl Graph {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run the graph from `entry` to completion and return the final state.
    ///
    /// The resumable sub-state is persisted best-effort at the end of the
    /// run so a follow-up turn can re-enter without redoing identification.
    pub async fn run(&self, entry: NodeId, mut state: RunState) -> Result<RunState, GraphError> {
        info!(
            conversation_id = %state.conversation_id,
            entry = %entry,
            skip_vision = state.skip_vision,
            "Starting graph run"
        );

        let mut current = entry;
        for _ in 0..MAX_STEPS {
            let update = self.execute(current, &state).await?;
            state.apply(update);

            match route_after(current, &state, &self.ctx.graph) {
                Route::Next(next) => {
                    debug!(from = %current, to = %next, "Routing");
                    current = next;
                }
                Route::FanOut { branches, join } => {
                    debug!(from = %current, ?branches, join = %join, "Fanning out");
                    let results = join_all(
                        branches
                            .iter()
                            .map(|&branch| self.execute(branch, &state)),
                    )
                    .await;
                    // Merge in branch declaration order, waiting for all.
                    for result in results {
                        state.apply(result?);
                    }
                    current = join;
                }
                Route::End => {
                    self.save_snapshot(&state).await;
                    info!(
                        conversation_id = %state.conversation_id,
                        nodes_timed = state.node_timings.len(),
                        "Graph run complete"
                    );
                    return Ok(state);
                }
            }
        }

        // A total route table cannot get here unless a cycle was wired in.
        Err(GraphError::UnknownRoute {
            node: current.name().to_string(),
        })
    }

    /// Execute one node, recording wall time and catching failures.
    async fn execute(&self, node: NodeId, state: &RunState) -> Result<StateUpdate, GraphError> {
        let start = Instant::now();
        let result = nodes::run_node(node, &self.ctx, state).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut update = match result {
            Ok(update) => update,
            Err(e) if node == NodeId::Vision => {
                error!(error = %e, "Identification failed at entry, aborting run");
                return Err(GraphError::IdentificationFailed {
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!(node = %node, error = %e, "Node failed, continuing with empty update");
                StateUpdate::empty()
            }
        };

        debug!(node = %node, elapsed_ms, "Node complete");
        update.node_timings.insert(node.name().to_string(), elapsed_ms);
        Ok(update)
    }

    async fn save_snapshot(&self, state: &RunState) {
        if state.conversation_id.is_empty() {
            return;
        }
        if let Err(e) = self.ctx.storage.save_snapshot(&state.snapshot()).await {
            warn!(
                conversation_id = %state.conversation_id,
                error = %e,
                "Could not persist conversation snapshot"
            );
        }
    }
}


#[cfg(test)]
mod tests {
    use super::state::*;
    use super::*;
    use crate::gate::VetoDecision;

    fn config() -> GraphConfig {
        GraphConfig::default()
    }

    #[test]
    fn test_router_defaults_to_vision() {
        let state = RunState::new("conv-1", "q");
        assert_eq!(
            route_after(NodeId::Router, &state, &config()),
            Route::Next(NodeId::Vision)
        );
    }

    #[test]
    fn test_router_chat_intents_go_to_chat() {
        let mut state = RunState::new("conv-1", "q");
        for intent in [RouterIntent::Chat, RouterIntent::UpdatePreferences] {
            state.router_decision = Some(intent);
            assert_eq!(
                route_after(NodeId::Router, &state, &config()),
                Route::Next(NodeId::Chat)
            );
        }
    }

    #[test]
    fn test_vision_fans_out_to_research_and_scout() {
        let state = RunState::new("conv-1", "q");
        assert_eq!(
            route_after(NodeId::Vision, &state, &config()),
            Route::FanOut {
                branches: vec![NodeId::Research, NodeId::MarketScout],
                join: NodeId::Gatekeeper,
            }
        );
    }

    #[test]
    fn test_detect_only_ends_after_vision() {
        let mut state = RunState::new("conv-1", "q");
        state.detect_only = true;
        assert_eq!(route_after(NodeId::Vision, &state, &config()), Route::End);
    }

    #[test]
    fn test_gate_veto_routes_back_to_scout() {
        let mut state = RunState::new("conv-1", "q");
        state.skeptic_decision = Some(VetoDecision::veto("best q reddit", "generic"));
        state.skeptic_loop_count = 1;
        assert_eq!(
            route_after(NodeId::Gatekeeper, &state, &config()),
            Route::Next(NodeId::MarketScout)
        );
    }

    #[test]
    fn test_gate_proceed_fans_out_to_critique_and_analysis() {
        let mut state = RunState::new("conv-1", "q");
        state.skeptic_decision = Some(VetoDecision::proceed("fine"));
        assert_eq!(
            route_after(NodeId::Gatekeeper, &state, &config()),
            Route::FanOut {
                branches: vec![NodeId::Critique, NodeId::Analysis],
                join: NodeId::Response,
            }
        );
    }

    #[test]
    fn test_gate_veto_past_ceiling_still_proceeds() {
        // Engine-side belt: even a (miswired) veto past the ceiling moves on.
        let mut state = RunState::new("conv-1", "q");
        state.skeptic_decision = Some(VetoDecision::veto("again", "still bad"));
        state.skeptic_loop_count = 3;
        assert!(matches!(
            route_after(NodeId::Gatekeeper, &state, &config()),
            Route::FanOut { .. }
        ));
    }

    #[test]
    fn test_chat_loop_steps() {
        let mut state = RunState::new("conv-1", "q");
        assert_eq!(route_after(NodeId::Chat, &state, &config()), Route::End);

        state.loop_step = Some(LoopStep::MarketScout);
        assert_eq!(
            route_after(NodeId::Chat, &state, &config()),
            Route::Next(NodeId::MarketScout)
        );

        state.loop_step = Some(LoopStep::Analysis);
        assert_eq!(
            route_after(NodeId::Chat, &state, &config()),
            Route::Next(NodeId::Analysis)
        );
    }

    #[test]
    fn test_response_is_terminal() {
        let state = RunState::new("conv-1", "q");
        assert_eq!(route_after(NodeId::Response, &state, &config()), Route::End);
    }
}
