use futures::stream::{self, StreamExt};
use semsearch_common::{AppConfig, Result};
use semsearch_embed::{EmbedPool, PoolError};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::Payload;
use crate::vector_store::VectorStore;

/// Record to embed and store
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Record ID (None = generated UUID)
    pub id: Option<String>,

    /// Fields stored with the vector
    pub payload: Payload,

    /// Text the vector is computed from
    pub text: String,
}

impl SourceRecord {
    pub fn new(id: Option<String>, payload: Payload, text: impl Into<String>) -> Self {
        Self {
            id,
            payload,
            text: text.into(),
        }
    }

    /// Build a record whose text joins the given payload fields (one per line)
    pub fn from_payload<S: AsRef<str>>(payload: Payload, text_fields: &[S], id_field: Option<&str>) -> Self {
        let id = id_field
            .and_then(|field| payload.get(field))
            .and_then(|value| match value {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        let text = text_fields
            .iter()
            .filter_map(|field| payload.get(field.as_ref()))
            .map(value_text)
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        Self { id, payload, text }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

/// Hex SHA-256 of the embedded text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Records in flight at once
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { batch_size: 5 }
    }
}

impl IngestConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.ingest_batch_size,
        }
    }
}

/// A record that could not be stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestFailure {
    pub id: String,
    pub attempts: u32,
    pub reason: String,
}

/// Outcome of a reseed or ingest run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub total: usize,
    pub succeeded: usize,
    /// Unchanged records left alone by an incremental ingest
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<IngestFailure>,
    /// Some records were never attempted because the run was cancelled
    pub cancelled: bool,
}

impl IngestReport {
    /// Every record stored or skipped
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

enum Outcome {
    Stored,
    Skipped,
    Failed(IngestFailure),
    NotStarted,
}

type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Source records -> embeddings -> collection
#[derive(Clone)]
pub struct IngestionPipeline {
    collection: Arc<VectorStore>,
    pool: EmbedPool,
    config: IngestConfig,
    progress: Option<ProgressFn>,
}

impl IngestionPipeline {
    pub fn new(collection: Arc<VectorStore>, pool: EmbedPool, config: IngestConfig) -> Self {
        Self {
            collection,
            pool,
            config,
            progress: None,
        }
    }

    /// Called with `(finished, total)` after every record
    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Clear the collection and repopulate it from `records`
    pub async fn reseed(
        &self,
        records: Vec<SourceRecord>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        info!(
            "Reseeding collection '{}' with {} record(s)",
            self.collection.name(),
            records.len()
        );
        self.collection.delete_all()?;
        self.collection.adopt_model(self.pool.model())?;
        self.run(records, cancel, false).await
    }

    /// Upsert `records` without clearing; records with unchanged text are skipped
    pub async fn ingest(
        &self,
        records: Vec<SourceRecord>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        info!(
            "Ingesting {} record(s) into collection '{}'",
            records.len(),
            self.collection.name()
        );
        self.collection.adopt_model(self.pool.model())?;
        self.run(records, cancel, true).await
    }

    async fn run(
        &self,
        records: Vec<SourceRecord>,
        cancel: &CancellationToken,
        incremental: bool,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        let mut report = IngestReport {
            total: records.len(),
            ..IngestReport::default()
        };

        let mut outcomes = stream::iter(records)
            .map(|record| self.process(record, cancel, incremental))
            .buffer_unordered(self.config.batch_size.max(1));

        let mut finished = 0;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Outcome::Stored => report.succeeded += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed(failure) => {
                    report.failed += 1;
                    report.failures.push(failure);
                }
                Outcome::NotStarted => report.cancelled = true,
            }
            finished += 1;
            if let Some(progress) = &self.progress {
                progress(finished, report.total);
            }
        }
        report.failures.sort_by(|a, b| a.id.cmp(&b.id));

        info!(
            "Ingestion finished in {:?} - total: {}, succeeded: {}, skipped: {}, failed: {}{}",
            started.elapsed(),
            report.total,
            report.succeeded,
            report.skipped,
            report.failed,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    async fn process(
        &self,
        record: SourceRecord,
        cancel: &CancellationToken,
        incremental: bool,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::NotStarted;
        }

        let SourceRecord { id, payload, text } = record;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if text.trim().is_empty() {
            return Outcome::Failed(IngestFailure {
                id,
                attempts: 0,
                reason: "record has no text to embed".to_string(),
            });
        }

        let hash = content_hash(&text);
        if incremental && self.collection.content_hash(&id).as_deref() == Some(hash.as_str()) {
            debug!("Record {} unchanged, skipping", id);
            return Outcome::Skipped;
        }

        let embedded = match self.pool.embed(&text, cancel).await {
            Ok(embedded) => embedded,
            Err(PoolError::Cancelled) => return Outcome::NotStarted,
            Err(PoolError::Failed { attempts, last }) => {
                warn!("Record {} failed to embed after {} attempt(s): {}", id, attempts, last);
                return Outcome::Failed(IngestFailure {
                    id,
                    attempts,
                    reason: last.to_string(),
                });
            }
        };

        match self
            .collection
            .upsert_with_hash(&id, embedded.vector, payload, Some(hash))
        {
            Ok(version) => {
                debug!("Stored record {} (version {})", id, version);
                Outcome::Stored
            }
            Err(e) => {
                warn!("Record {} rejected by the collection: {}", id, e);
                Outcome::Failed(IngestFailure {
                    id,
                    attempts: embedded.attempts,
                    reason: e.to_string(),
                })
            }
        }
    }
}
