use async_trait::async_trait;
use std::time::Duration;

/// Failure kinds reported by an embedding backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbedError {
    /// Backend asked us to slow down
    #[error("rate limited by embedding backend")]
    RateLimited { retry_after: Option<Duration> },

    /// Request did not complete in time
    #[error("embedding request timed out")]
    Timeout,

    /// Backend rejected the text or the model name
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),

    /// Backend unreachable or returned a server error
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
}

impl EmbedError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidInput(_))
    }
}

/// Text -> vector capability
///
/// Vectors produced by different `model()` tags are never mixed in one
/// collection.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model tag stored alongside the collection
    fn model(&self) -> &str;

    /// Generate embedding for text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}
