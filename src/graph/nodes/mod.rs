//! Stage nodes: each takes the current state and returns a partial update.
//!
//! Nodes catch their own collaborator failures and degrade; errors that
//! escape a node are handled at the engine boundary.

pub mod analysis;
pub mod chat;
pub mod critique;
pub mod gatekeeper;
pub mod market_scout;
pub mod research;
pub mod response;
pub mod router;
pub mod vision;

use crate::error::NodeError;
use crate::graph::state::{RunState, StateUpdate};
use crate::graph::{NodeId, PipelineContext};

/// Dispatch a node by id.
pub async fn run_node(
    node: NodeId,
    ctx: &PipelineContext,
    state: &RunState,
) -> Result<StateUpdate, NodeError> {
    match node {
        NodeId::Router => router::run(ctx, state).await,
        NodeId::Vision => vision::run(ctx, state).await,
        NodeId::Research => research::run(ctx, state).await,
        NodeId::MarketScout => market_scout::run(ctx, state).await,
        NodeId::Gatekeeper => gatekeeper::run(ctx, state).await,
        NodeId::Critique => critique::run(ctx, state).await,
        NodeId::Analysis => analysis::run(ctx, state).await,
        NodeId::Response => response::run(ctx, state).await,
        NodeId::Chat => chat::run(ctx, state).await,
    }
}
