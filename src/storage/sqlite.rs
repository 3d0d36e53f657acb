use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;

use super::{CacheEntry, ChatMessage, ConversationSnapshot, PreferenceChoice, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory storage instance (tests and ephemeral runs)
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid in-memory URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::Query {
                message: format!("Invalid timestamp '{}': {}", raw, e),
            })
    }

    fn parse_json(raw: &str) -> StorageResult<serde_json::Value> {
        serde_json::from_str(raw).map_err(|e| StorageError::Query {
            message: format!("Invalid JSON payload: {}", e),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn cache_get(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query(
            r#"
            SELECT cache_key, cache_type, payload, expires_at, hit_count
            FROM query_cache
            WHERE cache_key = ? AND expires_at > ?
            "#,
        )
        .bind(key)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        // Hit count update is best effort; a miss here must not fail the get.
        let _ = sqlx::query("UPDATE query_cache SET hit_count = hit_count + 1 WHERE cache_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await;

        let expires_at: String = row.get("expires_at");
        let payload: String = row.get("payload");

        Ok(Some(CacheEntry {
            key: row.get("cache_key"),
            cache_type: row.get("cache_type"),
            payload: Self::parse_json(&payload)?,
            expires_at: Self::parse_timestamp(&expires_at)?,
            hit_count: row.get::<i64, _>("hit_count") + 1,
        }))
    }

    async fn cache_set(
        &self,
        key: &str,
        cache_type: &str,
        payload: &serde_json::Value,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let payload_str = serde_json::to_string(payload).map_err(|e| StorageError::Query {
            message: format!("Failed to serialize cache payload: {}", e),
        })?;

        sqlx::query(
            r#"
            INSERT INTO query_cache (cache_key, cache_type, payload, expires_at, hit_count, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                cache_type = excluded.cache_type,
                payload = excluded.payload,
                expires_at = excluded.expires_at,
                hit_count = 0
            "#,
        )
        .bind(key)
        .bind(cache_type)
        .bind(&payload_str)
        .bind(expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_explicit_preferences(
        &self,
        user_id: &str,
    ) -> StorageResult<Option<HashMap<String, f64>>> {
        let row = sqlx::query("SELECT weights FROM user_preferences WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let weights: String = row.get("weights");
        let parsed: HashMap<String, f64> =
            serde_json::from_str(&weights).map_err(|e| StorageError::Query {
                message: format!("Invalid preference weights: {}", e),
            })?;

        Ok(Some(parsed))
    }

    async fn save_explicit_preferences(
        &self,
        user_id: &str,
        weights: &HashMap<String, f64>,
    ) -> StorageResult<()> {
        let weights_str = serde_json::to_string(weights).map_err(|e| StorageError::Query {
            message: format!("Failed to serialize weights: {}", e),
        })?;

        sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, weights, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                weights = excluded.weights,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&weights_str)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_preference_choices(
        &self,
        user_id: &str,
    ) -> StorageResult<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT preference_type, COUNT(id) AS choice_count
            FROM preference_choices
            WHERE user_id = ?
            GROUP BY preference_type
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("preference_type"), r.get("choice_count")))
            .collect())
    }

    async fn save_preference_choice(&self, choice: &PreferenceChoice) -> StorageResult<()> {
        let context = choice
            .context_data
            .as_ref()
            .map(|c| serde_json::to_string(c).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO preference_choices
                (id, user_id, preference_type, product_chosen, original_product, context_data, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&choice.id)
        .bind(&choice.user_id)
        .bind(&choice.preference_type)
        .bind(&choice.product_chosen)
        .bind(&choice.original_product)
        .bind(&context)
        .bind(choice.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_chat_history(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> StorageResult<Vec<ChatMessage>> {
        // Take the newest N, then return them oldest first.
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM chat_messages
            WHERE conversation_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            let created_at: String = row.get("created_at");
            messages.push(ChatMessage {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                role: row.get("role"),
                content: row.get("content"),
                created_at: Self::parse_timestamp(&created_at)?,
            });
        }

        Ok(messages)
    }

    async fn append_chat_message(&self, message: &ChatMessage) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_snapshot(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Option<ConversationSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT conversation_id, product_query, market_scout_data, research_data,
                   risk_report, analysis_object
            FROM conversation_snapshots
            WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let parse_opt = |raw: Option<String>| -> StorageResult<Option<serde_json::Value>> {
            raw.map(|s| Self::parse_json(&s)).transpose()
        };

        Ok(Some(ConversationSnapshot {
            conversation_id: row.get("conversation_id"),
            product_query: parse_opt(row.get("product_query"))?,
            market_scout_data: parse_opt(row.get("market_scout_data"))?,
            research_data: parse_opt(row.get("research_data"))?,
            risk_report: parse_opt(row.get("risk_report"))?,
            analysis_object: parse_opt(row.get("analysis_object"))?,
        }))
    }

    async fn save_snapshot(&self, snapshot: &ConversationSnapshot) -> StorageResult<()> {
        let to_str = |v: &Option<serde_json::Value>| -> Option<String> {
            v.as_ref().map(|j| j.to_string())
        };

        sqlx::query(
            r#"
            INSERT INTO conversation_snapshots
                (conversation_id, product_query, market_scout_data, research_data,
                 risk_report, analysis_object, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                product_query = excluded.product_query,
                market_scout_data = excluded.market_scout_data,
                research_data = excluded.research_data,
                risk_report = excluded.risk_report,
                analysis_object = excluded.analysis_object,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&snapshot.conversation_id)
        .bind(to_str(&snapshot.product_query))
        .bind(to_str(&snapshot.market_scout_data))
        .bind(to_str(&snapshot.research_data))
        .bind(to_str(&snapshot.risk_report))
        .bind(to_str(&snapshot.analysis_object))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
