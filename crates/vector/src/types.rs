use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque named fields stored with a record
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record ID
    pub id: String,

    /// Caller-supplied fields
    #[serde(default)]
    pub payload: Payload,

    /// Embedding vector as produced by the embedder
    pub vector: Vec<f32>,

    /// 1 on insert, +1 on every replacement
    pub version: u64,

    /// Timestamp of the last write
    pub updated_at: DateTime<Utc>,

    /// SHA-256 (hex) of the text the vector was embedded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Ranked query hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Record ID
    pub id: String,

    /// Full or projected payload
    pub payload: Payload,

    /// Cosine similarity (-1.0 to 1.0)
    pub score: f32,
}

/// Persisted per-collection metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    /// Collection name
    pub name: String,

    /// Model tag of the embedder that produced the stored vectors
    pub embedding_model: String,

    /// Fixed dimensionality, once known
    #[serde(default)]
    pub dimension: Option<usize>,

    /// Cluster centroids from the last rebuild
    #[serde(default)]
    pub centroids: Vec<Vec<f32>>,
}

impl CollectionMeta {
    pub fn new(name: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedding_model: embedding_model.into(),
            dimension: None,
            centroids: Vec::new(),
        }
    }
}

/// Snapshot of collection health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub embedding_model: String,
    pub dimension: Option<usize>,
    pub records: usize,
    pub indexed: usize,
    pub clusters: usize,
    pub cluster_sizes: Vec<usize>,
    pub persistent: bool,
}

/// Ids present on only one side of the store / index pair
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub missing_from_index: Vec<String>,
    pub missing_from_store: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty() && self.missing_from_store.is_empty()
    }
}
