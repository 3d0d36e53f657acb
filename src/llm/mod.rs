//! LLM client for structured judgment calls.
//!
//! Every judgment in the pipeline (intent routing, candidate extraction,
//! critique, sentiment analysis, response formulation, chat) goes through the
//! [`ChatCompleter`] seam so nodes can be tested with canned completions.

mod client;
mod types;

pub use client::LlmClient;
pub use types::{ChatRequest, ChatResponse, Message, MessageRole};

use async_trait::async_trait;

use crate::error::LlmResult;

/// Seam for chat-completion calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Run a completion against the named model and return the raw text.
    async fn complete(&self, model: &str, messages: Vec<Message>) -> LlmResult<String>;
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON (fast path)
/// 2. ```json ... ``` code blocks
/// 3. ``` ... ``` code blocks
pub fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}
