//! Product identification from the attached image.
//!
//! Tries the visual search collaborator first, then falls back to an LLM
//! identification over the raw image payload. Unlike every other node, a
//! failure here is fatal to the run: nothing downstream can work without a
//! product.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::graph::state::{RunState, StateUpdate};
use crate::graph::PipelineContext;
use crate::llm::{extract_json_from_completion, Message};
use crate::prompts::VISION_IDENTIFY_PROMPT;
use crate::sources::IdentifiedProduct;

#[derive(Debug, Deserialize)]
struct VisionJudgment {
    product_name: String,
    #[serde(default)]
    confidence: f64,
}

pub async fn run(ctx: &PipelineContext, state: &RunState) -> Result<StateUpdate, NodeError> {
    // Follow-up turns re-inject the identified product; never redo it.
    if state.skip_vision || state.product_query.is_some() {
        debug!("Identification already settled, passing through");
        return Ok(StateUpdate::empty());
    }

    let image = state
        .image_base64
        .as_deref()
        .ok_or_else(|| NodeError::Validation {
            field: "image_base64".to_string(),
            reason: "vision entry requires an image".to_string(),
        })?;

    let product = match ctx.identifier.identify(image).await {
        Ok(product) if !product.canonical_name.is_empty() => product,
        Ok(_) => {
            warn!("Visual search returned an empty name, falling back to LLM");
            llm_identify(ctx, image).await?
        }
        Err(e) => {
            warn!(error = %e, "Visual search unavailable, falling back to LLM");
            llm_identify(ctx, image).await?
        }
    };

    info!(
        product = %product.canonical_name,
        confidence = product.confidence,
        source = %product.source_tag,
        "Identified product"
    );

    Ok(StateUpdate {
        product_query: Some(product),
        ..Default::default()
    })
}

async fn llm_identify(
    ctx: &PipelineContext,
    image_base64: &str,
) -> Result<IdentifiedProduct, NodeError> {
    let messages = vec![
        Message::system(VISION_IDENTIFY_PROMPT),
        Message::user(format!("data:image/jpeg;base64,{}", image_base64)),
    ];

    let completion = ctx
        .llm
        .complete(&ctx.models.vision, messages)
        .await
        .map_err(|e| NodeError::Collaborator {
            message: format!("vision model call failed: {}", e),
        })?;

    let json = extract_json_from_completion(&completion)
        .map_err(|message| NodeError::ParseFailed { message })?;
    let judgment: VisionJudgment =
        serde_json::from_str(json).map_err(|e| NodeError::ParseFailed {
            message: format!("vision judgment did not match schema: {}", e),
        })?;

    if judgment.product_name.is_empty() {
        return Err(NodeError::Validation {
            field: "product_name".to_string(),
            reason: "no product visible in image".to_string(),
        });
    }

    Ok(IdentifiedProduct {
        canonical_name: judgment.product_name,
        confidence: judgment.confidence,
        source_tag: "llm_vision".to_string(),
        link: None,
    })
}
