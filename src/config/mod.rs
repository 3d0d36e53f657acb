use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub graph: GraphConfig,
}

/// LLM API configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub models: ModelConfig,
}

/// Model name configuration, one per judgment role
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub vision: String,
    pub reasoning: String,
    pub analysis: String,
    pub response: String,
    pub chat: String,
}

/// External search provider configuration.
///
/// Missing keys are not an error: the matching collaborator degrades to
/// empty results so the pipeline always completes.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub tavily_api_key: Option<String>,
    pub serp_api_key: Option<String>,
    pub region: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Orchestration graph tuning
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Hard ceiling on quality-gate retries (0-based loop count).
    pub max_gate_retries: u32,
    /// Worker cap for per-candidate scoring fan-out.
    pub scoring_workers: usize,
    /// Per-subtask timeout inside a node (candidate scoring, searches).
    pub subtask_timeout_ms: u64,
    /// Critique cache TTL.
    pub critique_cache_ttl_minutes: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = LlmConfig {
            api_key: env::var("LLM_API_KEY").map_err(|_| AppError::Config {
                message: "LLM_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            models: ModelConfig {
                vision: env::var("MODEL_VISION").unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
                reasoning: env::var("MODEL_REASONING")
                    .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
                analysis: env::var("MODEL_ANALYSIS")
                    .unwrap_or_else(|_| "gemini-2.0-flash-lite".to_string()),
                response: env::var("MODEL_RESPONSE")
                    .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
                chat: env::var("MODEL_CHAT").unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            },
        };

        let search = SearchConfig {
            tavily_api_key: env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty()),
            serp_api_key: env::var("SERPAPI_API_KEY").ok().filter(|k| !k.is_empty()),
            region: env::var("SEARCH_REGION").unwrap_or_else(|_| "CA".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/shopsage.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        };

        let graph = GraphConfig {
            max_gate_retries: env::var("MAX_GATE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            scoring_workers: env::var("SCORING_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            subtask_timeout_ms: env::var("SUBTASK_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20000),
            critique_cache_ttl_minutes: env::var("CRITIQUE_CACHE_TTL_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        };

        Ok(Config {
            llm,
            search,
            database,
            logging,
            request,
            graph,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15000,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_gate_retries: 2,
            scoring_workers: 3,
            subtask_timeout_ms: 20000,
            critique_cache_ttl_minutes: 30,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vision: "gemini-2.0-flash".to_string(),
            reasoning: "gemini-2.0-flash".to_string(),
            analysis: "gemini-2.0-flash-lite".to_string(),
            response: "gemini-2.0-flash".to_string(),
            chat: "gemini-2.0-flash".to_string(),
        }
    }
}
