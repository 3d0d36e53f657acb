//! Review and price discovery for the identified product.
//!
//! The two sub-calls are independent and run concurrently; either side
//! degrades to an empty list so one flaky source never empties the other.

use tracing::{debug, warn};

use crate::error::NodeError;
use crate::graph::state::{ResearchData, RunState, StateUpdate};
use crate::graph::PipelineContext;

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    let Some(product) = &state.product_query else {
        debug!("No identified product, skipping research");
        return Ok(StateUpdate::empty());
    };
    let name = product.canonical_name.as_str();

    let (reviews, prices) = tokio::join!(
        ctx.reviews.search_reviews(name),
        ctx.prices.search_prices(name),
    );

    let reviews = reviews.unwrap_or_else(|e| {
        warn!(product = name, error = %e, "Review search failed, continuing without reviews");
        Vec::new()
    });
    let prices = prices.unwrap_or_else(|e| {
        warn!(product = name, error = %e, "Price search failed, continuing without prices");
        Vec::new()
    });

    debug!(
        product = name,
        reviews = reviews.len(),
        prices = prices.len(),
        "Research complete"
    );

    Ok(StateUpdate {
        research_data: Some(ResearchData { reviews, prices }),
        ..Default::default()
    })
}
