use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock};
use semsearch_common::{AppConfig, Result, SemsearchError};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::index::{RebuildStats, SimilarityIndex};
use crate::kmeans::KMeansOptions;
use crate::similarity::validate_vector;
use crate::store::RecordStore;
use crate::types::{CollectionMeta, CollectionStats, ConsistencyReport, Payload, Record};
use crate::wal::{LogEntry, RecordLog};

const WRITE_STRIPES: usize = 64;

/// How to open a collection
#[derive(Debug, Clone)]
pub struct VectorStoreOptions {
    /// Collection name
    pub name: String,

    /// Model tag used when the collection is new or empty
    pub embedding_model: String,

    /// Fixed dimensionality (None = first vector decides)
    pub dimension: Option<usize>,

    /// Parent directory for durable storage (None = memory only)
    pub data_dir: Option<PathBuf>,
}

impl VectorStoreOptions {
    pub fn in_memory(name: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedding_model: embedding_model.into(),
            dimension: None,
            data_dir: None,
        }
    }

    pub fn persistent(
        data_dir: impl Into<PathBuf>,
        name: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::in_memory(name, embedding_model)
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            name: config.collection.clone(),
            embedding_model: config.embedding_model.clone(),
            dimension: config.embedding_dimension,
            data_dir: Some(config.data_dir.clone()),
        }
    }
}

/// A collection: record store + similarity index kept in lock-step
///
/// Every mutation is durable-log first, then store, then index (removal runs
/// index before store). Writes to the same id serialize on a striped lock;
/// `delete_all` and `compact` take every stripe.
pub struct VectorStore {
    meta: RwLock<CollectionMeta>,
    configured_dimension: Option<usize>,
    store: RecordStore,
    index: SimilarityIndex,
    log: Option<RecordLog>,
    stripes: Vec<Mutex<()>>,
}

impl VectorStore {
    /// Open a collection, replaying its log when it is persistent
    pub fn open(options: VectorStoreOptions) -> Result<Self> {
        if options.name.trim().is_empty() {
            return Err(SemsearchError::invalid_parameter("collection name cannot be empty"));
        }
        if options.dimension == Some(0) {
            return Err(SemsearchError::invalid_parameter("dimension must be greater than 0"));
        }

        let (log, records, stored_meta) = match &options.data_dir {
            Some(dir) => {
                let (log, replay) = RecordLog::open(&dir.join(&options.name))?;
                let meta = log.read_meta()?;
                (Some(log), replay.records, meta)
            }
            None => (None, Vec::new(), None),
        };

        let mut meta = match stored_meta {
            Some(meta) if !records.is_empty() => meta,
            Some(mut meta) => {
                // Nothing stored yet, so the configured model may take over
                meta.embedding_model = options.embedding_model.clone();
                meta.centroids.clear();
                meta
            }
            None => CollectionMeta::new(&options.name, &options.embedding_model),
        };

        let store = RecordStore::new();
        let index = SimilarityIndex::new(options.dimension);
        for record in records {
            index.add(&record.id, &record.vector).map_err(|e| {
                SemsearchError::storage(format!(
                    "Stored record '{}' cannot be indexed: {}",
                    record.id, e
                ))
            })?;
            store.put(record);
        }

        if !meta.centroids.is_empty() {
            let centroids = std::mem::take(&mut meta.centroids);
            match index.restore_centroids(centroids) {
                Ok(stats) => {
                    debug!("Restored {} cluster centroid(s)", stats.clusters);
                }
                Err(e) => warn!("Discarding stored centroids: {}", e),
            }
            meta.centroids = index.centroids();
        }
        meta.dimension = index.dimension();

        let collection = Self {
            meta: RwLock::new(meta),
            configured_dimension: options.dimension,
            store,
            index,
            log,
            stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        };
        collection.persist_meta()?;

        info!(
            "Collection '{}' opened - {} records, model={}, dimension={:?}",
            options.name,
            collection.len(),
            collection.embedding_model(),
            collection.dimension()
        );
        Ok(collection)
    }

    /// Memory-only collection
    pub fn in_memory(name: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            meta: RwLock::new(CollectionMeta::new(name, embedding_model)),
            configured_dimension: None,
            store: RecordStore::new(),
            index: SimilarityIndex::new(None),
            log: None,
            stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    pub fn embedding_model(&self) -> String {
        self.meta.read().embedding_model.clone()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.index.dimension()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn is_persistent(&self) -> bool {
        self.log.is_some()
    }

    /// Fail unless vectors from `model` may be compared with the stored ones
    pub fn check_model(&self, model: &str) -> Result<()> {
        let meta = self.meta.read();
        if meta.embedding_model == model || self.store.is_empty() {
            Ok(())
        } else {
            Err(SemsearchError::incompatible_model(&meta.embedding_model, model))
        }
    }

    /// Tag the collection with `model`; only allowed while it holds no records
    pub fn adopt_model(&self, model: &str) -> Result<()> {
        {
            let mut meta = self.meta.write();
            if meta.embedding_model == model {
                return Ok(());
            }
            if !self.store.is_empty() {
                return Err(SemsearchError::incompatible_model(&meta.embedding_model, model));
            }
            info!(
                "Collection '{}' re-tagged: {} -> {}",
                meta.name, meta.embedding_model, model
            );
            meta.embedding_model = model.to_string();
        }
        self.persist_meta()
    }

    /// Insert or replace a record; returns its new version
    pub fn upsert(&self, id: &str, vector: Vec<f32>, payload: Payload) -> Result<u64> {
        self.upsert_with_hash(id, vector, payload, None)
    }

    /// `upsert` that also records the hash of the embedded text
    pub fn upsert_with_hash(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: Payload,
        content_hash: Option<String>,
    ) -> Result<u64> {
        if id.trim().is_empty() {
            return Err(SemsearchError::invalid_parameter("record id cannot be empty"));
        }
        validate_vector(&vector)?;

        let _stripe = self.stripe(id).lock();
        self.index.ensure_dimension(vector.len())?;

        let version = self.store.with_record(id, |r| r.version + 1).unwrap_or(1);
        let record = Record {
            id: id.to_string(),
            payload,
            vector,
            version,
            updated_at: Utc::now(),
            content_hash,
        };

        if let Some(log) = &self.log {
            log.append(&LogEntry::Upsert {
                record: record.clone(),
            })?;
        }

        let previous = self.store.put(record);
        let added = self
            .store
            .with_record(id, |r| self.index.add(id, &r.vector))
            .unwrap_or_else(|| Err(SemsearchError::internal("record vanished during upsert")));

        if let Err(e) = added {
            self.roll_back_upsert(id, previous);
            return Err(e);
        }

        self.sync_dimension_meta();
        debug!("Upserted record {} (version {})", id, version);
        Ok(version)
    }

    fn roll_back_upsert(&self, id: &str, previous: Option<Record>) {
        let compensation = match previous {
            Some(previous) => {
                let entry = LogEntry::Upsert {
                    record: previous.clone(),
                };
                self.store.put(previous);
                entry
            }
            None => {
                self.store.remove(id);
                LogEntry::Delete { id: id.to_string() }
            }
        };
        if let Some(log) = &self.log {
            if let Err(e) = log.append(&compensation) {
                warn!("Failed to log rollback of record {}: {}", id, e);
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Record> {
        self.store
            .get(id)
            .ok_or_else(|| SemsearchError::not_found(format!("record '{}'", id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    /// Delete the given ids; absent ids are skipped. Returns how many were removed.
    pub fn delete_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            let id = id.as_ref();
            let _stripe = self.stripe(id).lock();
            if !self.store.contains(id) {
                // Keep the index clean even if it somehow kept a stray entry
                self.index.remove(id);
                continue;
            }

            if let Some(log) = &self.log {
                if let Err(e) = log.append(&LogEntry::Delete { id: id.to_string() }) {
                    warn!(
                        "Delete stopped after removing {} of {} requested record(s): {}",
                        removed,
                        ids.len(),
                        e
                    );
                    return Err(SemsearchError::storage(format!(
                        "delete stopped after removing {} of {} record(s): {}",
                        removed,
                        ids.len(),
                        e
                    )));
                }
            }
            self.index.remove(id);
            self.store.remove(id);
            removed += 1;
        }

        if removed > 0 {
            info!("Deleted {} of {} requested record(s)", removed, ids.len());
        }
        Ok(removed)
    }

    /// Remove every record and the cluster layout; returns how many records were dropped
    pub fn delete_all(&self) -> Result<usize> {
        let _all = self.lock_all_stripes();

        if let Some(log) = &self.log {
            log.append(&LogEntry::Clear)?;
        }
        self.index.clear();
        let removed = self.store.clear();

        {
            let mut meta = self.meta.write();
            meta.centroids.clear();
            meta.dimension = self.configured_dimension;
        }
        self.persist_meta()?;

        info!("Cleared collection '{}' - {} record(s) removed", self.name(), removed);
        Ok(removed)
    }

    /// Nearest ids to `vector`; see `SimilarityIndex::search`
    pub fn search(
        &self,
        vector: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        self.index.search(vector, num_candidates, limit)
    }

    /// Retrain the cluster layout with `clusters` centroids
    ///
    /// Writes wait for the rebuild; searches keep running.
    pub fn rebuild_clusters(&self, clusters: usize, options: &KMeansOptions) -> Result<RebuildStats> {
        let _all = self.lock_all_stripes();
        let stats = self.index.rebuild(clusters, options)?;
        self.meta.write().centroids = self.index.centroids();
        self.persist_meta()?;
        Ok(stats)
    }

    /// Rewrite the durable log so it only holds live records
    pub fn compact(&self) -> Result<()> {
        let Some(log) = &self.log else {
            return Ok(());
        };
        let _all = self.lock_all_stripes();
        log.compact(&self.store.snapshot())
    }

    /// Flush and fsync the log
    pub fn flush(&self) -> Result<()> {
        if let Some(log) = &self.log {
            log.sync()?;
        }
        Ok(())
    }

    /// Flush everything to disk before shutdown
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.persist_meta()?;
        info!("Collection '{}' closed", self.name());
        Ok(())
    }

    pub fn stats(&self) -> CollectionStats {
        let meta = self.meta.read();
        CollectionStats {
            name: meta.name.clone(),
            embedding_model: meta.embedding_model.clone(),
            dimension: self.index.dimension(),
            records: self.store.len(),
            indexed: self.index.len(),
            clusters: meta.centroids.len(),
            cluster_sizes: self.index.cluster_sizes(),
            persistent: self.log.is_some(),
        }
    }

    /// All record ids, sorted
    pub fn ids(&self) -> Vec<String> {
        self.store.ids()
    }

    /// Compare store and index membership
    pub fn check_consistency(&self) -> ConsistencyReport {
        let store_ids = self.store.ids();
        let index_ids = self.index.ids();

        let mut report = ConsistencyReport::default();
        let (mut i, mut j) = (0, 0);
        while i < store_ids.len() || j < index_ids.len() {
            match (store_ids.get(i), index_ids.get(j)) {
                (Some(s), Some(x)) if s == x => {
                    i += 1;
                    j += 1;
                }
                (Some(s), Some(x)) if s < x => {
                    report.missing_from_index.push(s.clone());
                    i += 1;
                }
                (Some(_), Some(x)) => {
                    report.missing_from_store.push(x.clone());
                    j += 1;
                }
                (Some(s), None) => {
                    report.missing_from_index.push(s.clone());
                    i += 1;
                }
                (None, Some(x)) => {
                    report.missing_from_store.push(x.clone());
                    j += 1;
                }
                (None, None) => break,
            }
        }
        report
    }

    /// Run `f` against the stored payload of `id`
    pub(crate) fn with_payload<T>(&self, id: &str, f: impl FnOnce(&Payload) -> T) -> Option<T> {
        self.store.with_record(id, |record| f(&record.payload))
    }

    /// Stored content hash of `id`, if any
    pub(crate) fn content_hash(&self, id: &str) -> Option<String> {
        self.store
            .with_record(id, |record| record.content_hash.clone())
            .flatten()
    }

    fn sync_dimension_meta(&self) {
        let dimension = self.index.dimension();
        if self.meta.read().dimension == dimension {
            return;
        }
        self.meta.write().dimension = dimension;
        if let Err(e) = self.persist_meta() {
            warn!("Failed to persist collection dimension: {}", e);
        }
    }

    fn persist_meta(&self) -> Result<()> {
        match &self.log {
            Some(log) => {
                let meta = self.meta.read().clone();
                log.write_meta(&meta)
            }
            None => Ok(()),
        }
    }

    fn stripe(&self, id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % WRITE_STRIPES]
    }

    fn lock_all_stripes(&self) -> Vec<MutexGuard<'_, ()>> {
        self.stripes.iter().map(|stripe| stripe.lock()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_upsert_versions_and_get() {
        let store = VectorStore::in_memory("t", "m");
        assert_eq!(store.upsert("a", vec![1.0, 0.0], payload(json!({"n": 1}))).unwrap(), 1);
        let first = store.get("a").unwrap();

        assert_eq!(store.upsert("a", vec![0.0, 1.0], payload(json!({"n": 2}))).unwrap(), 2);
        let second = store.get("a").unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.payload["n"], json!(2));
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = VectorStore::in_memory("t", "m");
        assert!(matches!(store.get("nope"), Err(SemsearchError::NotFound(_))));
    }

    #[test]
    fn test_rejected_vectors_leave_no_trace() {
        let store = VectorStore::in_memory("t", "m");
        store.upsert("a", vec![1.0, 0.0, 0.0], Payload::new()).unwrap();

        assert!(matches!(
            store.upsert("b", vec![1.0, 0.0], Payload::new()),
            Err(SemsearchError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            store.upsert("c", vec![0.0, 0.0, 0.0], Payload::new()),
            Err(SemsearchError::InvalidVector(_))
        ));
        assert!(matches!(
            store.upsert(" ", vec![1.0, 0.0, 0.0], Payload::new()),
            Err(SemsearchError::InvalidParameter(_))
        ));

        assert_eq!(store.ids(), vec!["a"]);
        assert!(store.check_consistency().is_consistent());
    }

    #[test]
    fn test_delete_many_counts_existing_only() {
        let store = VectorStore::in_memory("t", "m");
        store.upsert("a", vec![1.0, 0.0], Payload::new()).unwrap();
        store.upsert("b", vec![0.0, 1.0], Payload::new()).unwrap();

        assert_eq!(store.delete_many(&["a", "ghost"]).unwrap(), 1);
        assert_eq!(store.ids(), vec!["b"]);
        let hits = store.search(&[1.0, 0.0], 10, 10).unwrap();
        assert!(hits.iter().all(|(id, _)| id != "a"));
        assert!(store.check_consistency().is_consistent());
    }

    #[test]
    fn test_failed_delete_reports_records_already_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VectorStore::open(VectorStoreOptions::persistent(tmp.path(), "c", "m")).unwrap();
        for id in ["a", "b", "c"] {
            store.upsert(id, vec![1.0, 0.0], Payload::new()).unwrap();
        }

        store.log.as_ref().unwrap().fail_appends_after(1);
        let err = store.delete_many(&["a", "b", "c"]).unwrap_err();
        match err {
            SemsearchError::Storage(msg) => assert!(msg.contains("removing 1 of 3"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }

        // "a" is gone everywhere; the rest were never touched
        assert!(!store.contains("a"));
        assert_eq!(store.ids(), vec!["b", "c"]);
        assert!(store.check_consistency().is_consistent());
    }

    #[test]
    fn test_rebuild_clusters_then_clear_then_new_dimension() {
        let store = VectorStore::in_memory("t", "m");
        for i in 0..8 {
            let angle = i as f32 * 0.7;
            store
                .upsert(&format!("v{}", i), vec![angle.cos(), angle.sin()], Payload::new())
                .unwrap();
        }
        let opts = KMeansOptions {
            seed: Some(2),
            ..KMeansOptions::default()
        };
        store.rebuild_clusters(2, &opts).unwrap();

        store.delete_all().unwrap();
        store.upsert("w", vec![0.0, 0.0, 1.0], Payload::new()).unwrap();
        assert_eq!(store.stats().clusters, 0);
        let stats = store.rebuild_clusters(2, &opts).unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(store.search(&[0.0, 0.0, 1.0], 1, 1).unwrap()[0].0, "w");
    }

    #[test]
    fn test_delete_all_resets_dimension() {
        let store = VectorStore::in_memory("t", "m");
        store.upsert("a", vec![1.0, 0.0], Payload::new()).unwrap();
        store.upsert("b", vec![0.0, 1.0], Payload::new()).unwrap();

        assert_eq!(store.delete_all().unwrap(), 2);
        assert!(store.is_empty());
        assert_eq!(store.dimension(), None);
        assert_eq!(store.stats().indexed, 0);

        store.upsert("c", vec![1.0, 2.0, 3.0], Payload::new()).unwrap();
        assert_eq!(store.dimension(), Some(3));
    }

    #[test]
    fn test_model_tagging() {
        let store = VectorStore::in_memory("t", "model-a");
        assert!(store.check_model("model-b").is_ok());
        store.upsert("a", vec![1.0], Payload::new()).unwrap();

        assert!(store.check_model("model-a").is_ok());
        assert!(matches!(
            store.check_model("model-b"),
            Err(SemsearchError::IncompatibleModel { .. })
        ));
        assert!(store.adopt_model("model-b").is_err());

        store.delete_all().unwrap();
        store.adopt_model("model-b").unwrap();
        assert_eq!(store.embedding_model(), "model-b");
    }

    #[test]
    fn test_reopen_restores_records_and_clusters() {
        let tmp = tempfile::tempdir().unwrap();
        let options = VectorStoreOptions::persistent(tmp.path(), "products", "m");

        {
            let store = VectorStore::open(options.clone()).unwrap();
            for i in 0..12 {
                let angle = i as f32 * 0.5;
                store
                    .upsert(&format!("p{:02}", i), vec![angle.cos(), angle.sin()], payload(json!({"i": i})))
                    .unwrap();
            }
            store.upsert("p00", vec![1.0, 1.0], payload(json!({"i": 100}))).unwrap();
            store.delete_many(&["p11"]).unwrap();
            let opts = KMeansOptions {
                seed: Some(1),
                ..KMeansOptions::default()
            };
            store.rebuild_clusters(3, &opts).unwrap();
            store.close().unwrap();
        }

        let store = VectorStore::open(options).unwrap();
        assert_eq!(store.len(), 11);
        assert_eq!(store.get("p00").unwrap().version, 2);
        assert_eq!(store.get("p00").unwrap().payload["i"], json!(100));
        assert!(matches!(store.get("p11"), Err(SemsearchError::NotFound(_))));
        assert_eq!(store.dimension(), Some(2));
        assert_eq!(store.stats().clusters, 3);
        assert!(store.check_consistency().is_consistent());
    }

    #[test]
    fn test_reopen_after_delete_all_and_compact() {
        let tmp = tempfile::tempdir().unwrap();
        let options = VectorStoreOptions::persistent(tmp.path(), "c", "m");
        {
            let store = VectorStore::open(options.clone()).unwrap();
            store.upsert("old", vec![1.0, 0.0], Payload::new()).unwrap();
            store.delete_all().unwrap();
            store.upsert("new", vec![0.0, 1.0, 0.0], Payload::new()).unwrap();
            store.compact().unwrap();
            store.close().unwrap();
        }

        let store = VectorStore::open(options).unwrap();
        assert_eq!(store.ids(), vec!["new"]);
        assert_eq!(store.dimension(), Some(3));
    }

    #[test]
    fn test_configured_dimension_is_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let options = VectorStoreOptions::persistent(tmp.path(), "c", "m").with_dimension(4);
        let store = VectorStore::open(options).unwrap();
        assert_eq!(store.dimension(), Some(4));
        assert!(matches!(
            store.upsert("a", vec![1.0, 0.0], Payload::new()),
            Err(SemsearchError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_stored_model_survives_reopen_with_other_model() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store =
                VectorStore::open(VectorStoreOptions::persistent(tmp.path(), "c", "model-a")).unwrap();
            store.upsert("a", vec![1.0, 0.0], Payload::new()).unwrap();
            store.close().unwrap();
        }

        let store =
            VectorStore::open(VectorStoreOptions::persistent(tmp.path(), "c", "model-b")).unwrap();
        assert_eq!(store.embedding_model(), "model-a");
        assert!(store.check_model("model-b").is_err());
    }
}
