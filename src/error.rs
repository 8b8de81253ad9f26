//! Error types for the crypto analyst orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, AnalystError>;

#[derive(Error, Debug)]
pub enum AnalystError {

    // =============================
    // Session Loop Errors
    // =============================

    /// Malformed caller input, rejected before the loop starts.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single capability invocation failed. Folded into the observation
    /// presented to the decision process, never returned to callers.
    #[error("Capability error: {0}")]
    Capability(String),

    /// The language model or its transport failed; aborts the loop.
    #[error("Decision process error: {0}")]
    DecisionProcess(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Capability not found: {0}")]
    NotFound(String),

    // =============================
    // Data Collaborator Errors
    // =============================

    #[error("Data fetch error: {0}")]
    DataFetch(String),

    #[error("Database error: {0}")]
    Database(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalystError {
    /// Errors the caller caused and can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        Self::is_client_kind(self.kind())
    }

    /// Whether errors of this kind carry caller-facing detail that is safe to echo.
    pub fn is_client_kind(kind: &str) -> bool {
        matches!(kind, "validation" | "not_found")
    }

    /// Short kind tag used by the HTTP surface and the terminal client.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalystError::Validation(_) => "validation",
            AnalystError::Capability(_) => "capability",
            AnalystError::DecisionProcess(_) => "decision_process",
            AnalystError::Config(_) => "config",
            AnalystError::Cancelled(_) => "cancelled",
            AnalystError::NotFound(_) => "not_found",
            AnalystError::DataFetch(_) | AnalystError::Http(_) => "data_fetch",
            AnalystError::Database(_) | AnalystError::Sql(_) => "database",
            AnalystError::Serialization(_) | AnalystError::Io(_) => "internal",
        }
    }
}
