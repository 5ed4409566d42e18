use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::types::Record;

const STORE_SHARDS: usize = 32;

/// In-memory id -> record map, sharded to keep writers on different ids apart
///
/// Validation and coupling with the index live in `VectorStore`.
pub struct RecordStore {
    shards: Vec<RwLock<HashMap<String, Record>>>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            shards: (0..STORE_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.shard(id).read().get(id).cloned()
    }

    /// Run `f` on the record without cloning it
    pub fn with_record<T>(&self, id: &str, f: impl FnOnce(&Record) -> T) -> Option<T> {
        self.shard(id).read().get(id).map(f)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shard(id).read().contains_key(id)
    }

    /// Insert or replace; returns the previous record
    pub fn put(&self, record: Record) -> Option<Record> {
        self.shard(&record.id).write().insert(record.id.clone(), record)
    }

    pub fn remove(&self, id: &str) -> Option<Record> {
        self.shard(id).write().remove(id)
    }

    /// Remove everything; returns how many records were dropped
    pub fn clear(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.write();
                let n = shard.len();
                shard.clear();
                n
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// All ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        ids.sort();
        ids
    }

    /// Clone of every record, sorted by id
    pub fn snapshot(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().values().cloned().collect::<Vec<_>>())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn shard(&self, id: &str) -> &RwLock<HashMap<String, Record>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % STORE_SHARDS]
    }
}
