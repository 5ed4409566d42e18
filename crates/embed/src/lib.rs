//! semsearch embedding integration
//!
//! The `Embedder` capability consumed by the engine, an Ollama HTTP adapter,
//! and the bounded retrying pool every embedding call goes through.

mod embedder;
mod ollama;
mod pool;
mod retry;
mod types;

pub use embedder::{EmbedError, Embedder};
pub use ollama::OllamaEmbedder;
pub use pool::{EmbedPool, Embedded, PoolError};
pub use retry::RetryPolicy;
pub use types::{EmbedRequest, EmbedResponse};
