//! Storage layer for cache entries, preferences, chat history, and
//! conversation snapshots.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::StorageResult;

/// A cached result row with TTL expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Derived cache key (never a raw query string).
    pub key: String,
    /// Namespace tag for the cached payload (e.g. "critique", "scout").
    pub cache_type: String,
    /// Opaque JSON payload.
    pub payload: serde_json::Value,
    /// Expiry instant; a `get` past this behaves identically to a miss.
    pub expires_at: DateTime<Utc>,
    /// Number of hits since the last overwrite.
    pub hit_count: i64,
}

/// An append-only record of a categorical preference choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceChoice {
    pub id: String,
    pub user_id: String,
    /// Categorical choice: "cheaper", "premium", "eco-friendly", "balanced".
    pub preference_type: String,
    pub product_chosen: String,
    pub original_product: String,
    pub context_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl PreferenceChoice {
    /// Create a new choice record
    pub fn new(
        user_id: impl Into<String>,
        preference_type: impl Into<String>,
        product_chosen: impl Into<String>,
        original_product: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            preference_type: preference_type.into(),
            product_chosen: product_chosen.into(),
            original_product: original_product.into(),
            context_data: None,
            created_at: Utc::now(),
        }
    }
}

/// A chat message persisted per conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a new chat message
    pub fn new(
        conversation_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role: role.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Resumable sub-state for a conversation: the stage outputs a follow-up
/// turn re-injects so the graph can resume without redoing identification.
/// Opaque to the engine; serialized verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub product_query: Option<serde_json::Value>,
    pub market_scout_data: Option<serde_json::Value>,
    pub research_data: Option<serde_json::Value>,
    pub risk_report: Option<serde_json::Value>,
    pub analysis_object: Option<serde_json::Value>,
}

/// Persistence operations used by the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch a non-expired cache entry and bump its hit count.
    async fn cache_get(&self, key: &str) -> StorageResult<Option<CacheEntry>>;

    /// Upsert a cache entry; an overwrite resets the hit count.
    async fn cache_set(
        &self,
        key: &str,
        cache_type: &str,
        payload: &serde_json::Value,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Load explicit preference weights for a user, if any were saved.
    async fn get_explicit_preferences(
        &self,
        user_id: &str,
    ) -> StorageResult<Option<HashMap<String, f64>>>;

    /// Save explicit preference weights for a user (whole-map overwrite).
    async fn save_explicit_preferences(
        &self,
        user_id: &str,
        weights: &HashMap<String, f64>,
    ) -> StorageResult<()>;

    /// Count past preference choices per category for a user.
    async fn count_preference_choices(
        &self,
        user_id: &str,
    ) -> StorageResult<Vec<(String, i64)>>;

    /// Append a preference choice (never updated in place).
    async fn save_preference_choice(&self, choice: &PreferenceChoice) -> StorageResult<()>;

    /// Load the most recent chat messages for a conversation, oldest first.
    async fn get_chat_history(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> StorageResult<Vec<ChatMessage>>;

    /// Append a chat message to a conversation.
    async fn append_chat_message(&self, message: &ChatMessage) -> StorageResult<()>;

    /// Load the resumable sub-state for a conversation.
    async fn load_snapshot(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<ConversationSnapshot>>;

    /// Upsert the resumable sub-state for a conversation.
    async fn save_snapshot(&self, snapshot: &ConversationSnapshot) -> StorageResult<()>;
}
