/// semsearch error types
#[derive(Debug, thiserror::Error)]
pub enum SemsearchError {
    /// Vector length differs from the collection dimensionality
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Bad limit / numCandidates / id / option value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Zero-norm or non-finite vector
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// Empty or malformed query text
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Embedder still failing after retries
    #[error("Embedding unavailable{}: {} (after {} attempt(s))", record_suffix(.id), .reason, .attempts)]
    EmbeddingUnavailable {
        id: Option<String>,
        attempts: u32,
        reason: String,
    },

    /// Embeddings come from a different model than the collection was built with
    #[error("Incompatible embedding model: collection uses '{expected}', embedder is '{actual}'")]
    IncompatibleModel { expected: String, actual: String },

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation aborted through a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Durable log / metadata problem
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General error (anyhow integration)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn record_suffix(id: &Option<String>) -> String {
    id.as_deref()
        .map(|id| format!(" for record {}", id))
        .unwrap_or_default()
}

impl SemsearchError {
    /// Create dimension mismatch error
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create invalid parameter error
    pub fn invalid_parameter<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create invalid vector error
    pub fn invalid_vector<S: Into<String>>(msg: S) -> Self {
        Self::InvalidVector(msg.into())
    }

    /// Create invalid query error
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create embedding unavailable error
    pub fn embedding_unavailable<S: Into<String>>(
        id: Option<String>,
        attempts: u32,
        reason: S,
    ) -> Self {
        Self::EmbeddingUnavailable {
            id,
            attempts,
            reason: reason.into(),
        }
    }

    /// Create incompatible model error
    pub fn incompatible_model<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        Self::IncompatibleModel {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Caller mistakes that retrying will never fix
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::InvalidParameter(_)
                | Self::InvalidVector(_)
                | Self::InvalidQuery(_)
                | Self::IncompatibleModel { .. }
        )
    }
}
