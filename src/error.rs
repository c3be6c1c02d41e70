//! Error types for the document analysis workflow

use thiserror::Error;

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {

    // =============================
    // Workflow Taxonomy
    // =============================

    /// Backing index unreachable or timed out. Fatal for the request.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Model call exceeded its deadline (after the stage-level retry).
    #[error("Completion timeout: {0}")]
    CompletionTimeout(String),

    /// Structured output did not conform to the requested shape.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Validation exhausted: {0}")]
    ValidationExhausted(String),

    /// Only ever logged; enrichment degrades silently.
    #[error("Enrichment partial: {0}")]
    EnrichmentPartial(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Invalid workflow state: {0}")]
    InvalidState(String),

    #[error("Ephemeral scope error: {0}")]
    ScopeError(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AnalysisError {
    /// Whether the stage-level completion retry applies to this error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AnalysisError::CompletionTimeout(_))
    }
}
