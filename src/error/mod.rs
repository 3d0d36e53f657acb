use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// LLM API errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Missing credentials: {message}")]
    MissingCredentials { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// External search / marketplace collaborator errors
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Orchestration graph errors.
///
/// Only `IdentificationFailed` is a runtime condition; the other variants
/// indicate wiring defects that should be caught by the routing tests.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Identification failed at entry: {message}")]
    IdentificationFailed { message: String },

    #[error("Unknown route target: {node}")]
    UnknownRoute { node: String },
}

/// Node-level errors, caught at the node boundary and converted to
/// empty partial updates by the engine.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Judgment parse failed: {message}")]
    ParseFailed { message: String },

    #[error("Collaborator call failed: {message}")]
    Collaborator { message: String },
}

impl From<NodeError> for AppError {
    fn from(err: NodeError) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for search operations
pub type SearchResult<T> = Result<T, SearchError>;
