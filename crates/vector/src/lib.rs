//! semsearch Vector Search Engine
//!
//! Durable record store, clustered cosine similarity index, query engine and
//! ingestion pipeline.

pub mod filter;
pub mod index;
pub mod ingest;
pub mod kmeans;
pub mod query;
pub mod similarity;
pub mod store;
pub mod types;
pub mod vector_store;
pub mod wal;

pub use filter::Filter;
pub use index::{RebuildStats, SimilarityIndex};
pub use ingest::{content_hash, IngestConfig, IngestFailure, IngestReport, IngestionPipeline, SourceRecord};
pub use kmeans::KMeansOptions;
pub use query::{QueryConfig, QueryEngine, QueryOptions};
pub use similarity::cosine_similarity;
pub use types::{CollectionMeta, CollectionStats, ConsistencyReport, Payload, QueryResult, Record};
pub use vector_store::{VectorStore, VectorStoreOptions};
