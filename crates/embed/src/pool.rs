use semsearch_common::SemsearchError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::embedder::{EmbedError, Embedder};
use crate::retry::RetryPolicy;

/// Successful embedding together with the attempts it took
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub attempts: u32,
}

/// Why `EmbedPool::embed` gave up
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    /// Non-transient failure, or transient failures until the attempt budget ran out
    #[error("{last} (after {attempts} attempt(s))")]
    Failed { attempts: u32, last: EmbedError },

    /// Cancellation token fired before a vector was produced
    #[error("embedding cancelled")]
    Cancelled,
}

impl PoolError {
    /// Attempts spent before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. } => *attempts,
            Self::Cancelled => 0,
        }
    }

    /// Convert into the engine error taxonomy, tagging the record id if any
    pub fn into_error(self, id: Option<String>) -> SemsearchError {
        match self {
            Self::Failed { attempts, last } => {
                SemsearchError::embedding_unavailable(id, attempts, last.to_string())
            }
            Self::Cancelled => SemsearchError::Cancelled,
        }
    }
}

/// Bounded-concurrency, retrying front for an `Embedder`
///
/// A permit is held only for the duration of a single backend call, so
/// backoff sleeps never occupy a slot.
#[derive(Clone)]
pub struct EmbedPool {
    embedder: Arc<dyn Embedder>,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl EmbedPool {
    pub fn new(embedder: Arc<dyn Embedder>, max_concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            embedder,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            policy,
        }
    }

    /// Model tag of the wrapped embedder
    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Embed `text`, retrying transient failures with exponential backoff
    pub async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Embedded, PoolError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }

            let result = {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                    permit = self.permits.acquire() => permit.map_err(|_| PoolError::Failed {
                        attempts: attempt,
                        last: EmbedError::Unavailable("embedding pool closed".to_string()),
                    })?,
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                    result = self.embedder.embed(text) => result,
                }
            };

            let err = match result {
                Ok(vector) => {
                    debug!("Embedding ready - Dimension: {}, Attempts: {}", vector.len(), attempt);
                    return Ok(Embedded {
                        vector,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= max_attempts {
                return Err(PoolError::Failed {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.policy.delay_after(attempt, &err);
            warn!(
                "Embedding request failed (attempt {}/{}): {}. Retrying in {:?}...",
                attempt, max_attempts, err, delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
