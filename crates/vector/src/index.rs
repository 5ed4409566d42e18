//! Clustered (IVF) similarity index
//!
//! ## Layout
//!
//! - **Centroids**: unit vectors produced by `rebuild`. None until the first rebuild.
//! - **Lists**: one map `id -> unit vector` per centroid (a single list when untrained).
//! - **Assignments**: sharded map `id -> list number`.
//!
//! ## Search
//!
//! 1. Rank centroids by similarity to the query
//! 2. Probe lists in that order until `num_candidates` vectors were collected
//! 3. Score every collected vector exactly and keep the top `limit`
//!
//! ## Locking
//!
//! `layout` is write-locked only by `rebuild` / `restore_centroids` / `clear`.
//! Readers and writers alike hold at most one list lock at a time.

use parking_lot::RwLock;
use semsearch_common::{Result, SemsearchError};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::kmeans::{self, nearest_centroid, KMeansOptions};
use crate::similarity::{dot, norm, normalized, validate_vector};

const ASSIGNMENT_SHARDS: usize = 16;

/// Summary returned by `rebuild`
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RebuildStats {
    /// Number of centroids actually trained
    pub clusters: usize,

    /// Entries per list after reassignment
    pub cluster_sizes: Vec<usize>,

    /// Entries reassigned
    pub entries: usize,
}

struct Layout {
    centroids: Vec<Vec<f32>>,
    lists: Vec<RwLock<HashMap<String, Vec<f32>>>>,
}

impl Layout {
    fn flat() -> Self {
        Self {
            centroids: Vec::new(),
            lists: vec![RwLock::new(HashMap::new())],
        }
    }

    fn list_for(&self, unit: &[f32]) -> usize {
        if self.centroids.is_empty() {
            0
        } else {
            nearest_centroid(&self.centroids, unit)
        }
    }

    /// List numbers ordered by centroid similarity (descending, ties by number)
    fn probe_order(&self, unit_query: &[f32]) -> Vec<usize> {
        if self.centroids.is_empty() {
            return vec![0];
        }
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, dot(c, unit_query)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().map(|(i, _)| i).collect()
    }
}

/// Approximate / exact cosine nearest-neighbor index over `(id, vector)` pairs
///
/// Holds unit-normalized copies of vectors and never any payload.
pub struct SimilarityIndex {
    configured_dimension: Option<usize>,
    /// 0 while no dimensionality has been fixed
    dimension: AtomicUsize,
    layout: RwLock<Layout>,
    assignments: Vec<RwLock<HashMap<String, usize>>>,
    len: AtomicUsize,
}

impl SimilarityIndex {
    /// Create an empty index; `dimension = None` lets the first vector decide
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            configured_dimension: dimension,
            dimension: AtomicUsize::new(dimension.unwrap_or(0)),
            layout: RwLock::new(Layout::flat()),
            assignments: (0..ASSIGNMENT_SHARDS)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            len: AtomicUsize::new(0),
        }
    }

    /// Fixed dimensionality, if any
    pub fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::Acquire) {
            0 => None,
            d => Some(d),
        }
    }

    /// Accept `len` as the dimensionality, fixing it if still open
    pub fn ensure_dimension(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(SemsearchError::invalid_vector("vector is empty"));
        }
        match self
            .dimension
            .compare_exchange(0, len, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                debug!("Index dimension fixed at {}", len);
                Ok(())
            }
            Err(current) if current == len => Ok(()),
            Err(current) => Err(SemsearchError::dimension_mismatch(current, len)),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.shard(id).read().contains_key(id)
    }

    /// All indexed ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .assignments
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        ids.sort();
        ids
    }

    /// Trained centroids (empty while the index is flat)
    pub fn centroids(&self) -> Vec<Vec<f32>> {
        self.layout.read().centroids.clone()
    }

    /// Entries per list
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.layout
            .read()
            .lists
            .iter()
            .map(|list| list.read().len())
            .collect()
    }

    /// Insert or replace the entry for `id`
    pub fn add(&self, id: &str, vector: &[f32]) -> Result<()> {
        validate_vector(vector)?;
        self.ensure_dimension(vector.len())?;
        let unit = normalized(vector)?;

        let layout = self.layout.read();
        let target = layout.list_for(&unit);

        let mut shard = self.shard(id).write();
        // Insert into the new list before dropping the old entry so a concurrent
        // search always sees at least one version of the id.
        layout.lists[target].write().insert(id.to_string(), unit);
        match shard.insert(id.to_string(), target) {
            Some(previous) if previous != target => {
                layout.lists[previous].write().remove(id);
            }
            Some(_) => {}
            None => {
                self.len.fetch_add(1, Ordering::AcqRel);
            }
        }

        Ok(())
    }

    /// Remove `id`; returns whether it was present
    pub fn remove(&self, id: &str) -> bool {
        let layout = self.layout.read();
        let mut shard = self.shard(id).write();
        match shard.remove(id) {
            Some(list) => {
                layout.lists[list].write().remove(id);
                self.len.fetch_sub(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Drop every entry and the cluster layout; dimension goes back to the configured value
    pub fn clear(&self) {
        let mut layout = self.layout.write();
        for shard in &self.assignments {
            shard.write().clear();
        }
        *layout = Layout::flat();
        self.len.store(0, Ordering::Release);
        self.dimension
            .store(self.configured_dimension.unwrap_or(0), Ordering::Release);
    }

    /// Top-`limit` ids by cosine similarity to `query`
    ///
    /// Lists are probed nearest-centroid first until at least `num_candidates`
    /// vectors were examined; with `num_candidates >= len()` the result is exact.
    /// Scores are cosine similarities in [-1, 1]; ties are ordered by ascending id.
    pub fn search(
        &self,
        query: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        if limit == 0 {
            return Err(SemsearchError::invalid_parameter("limit must be greater than 0"));
        }
        if num_candidates < limit {
            return Err(SemsearchError::invalid_parameter(format!(
                "numCandidates ({}) must be >= limit ({})",
                num_candidates, limit
            )));
        }
        validate_vector(query)?;
        match self.dimension() {
            Some(d) if d != query.len() => {
                return Err(SemsearchError::dimension_mismatch(d, query.len()));
            }
            Some(_) => {}
            // Nothing was ever indexed
            None => return Ok(Vec::new()),
        }
        let unit = normalized(query)?;

        let layout = self.layout.read();
        // At most one list guard is held at a time. An id re-added into another
        // list can transiently sit in both; keep its best score.
        let mut best: HashMap<String, f32> = HashMap::new();
        let mut examined = 0;
        let mut probed = 0;
        for list in layout.probe_order(&unit) {
            let entries = layout.lists[list].read();
            examined += entries.len();
            for (id, v) in entries.iter() {
                let score = dot(&unit, v).clamp(-1.0, 1.0);
                match best.get_mut(id.as_str()) {
                    Some(s) => *s = s.max(score),
                    None => {
                        best.insert(id.clone(), score);
                    }
                }
            }
            drop(entries);
            probed += 1;
            if examined >= num_candidates {
                break;
            }
        }
        drop(layout);

        let mut ranked: Vec<(String, f32)> = best.into_iter().collect();
        if ranked.len() > limit {
            ranked.select_nth_unstable_by(limit - 1, rank_order);
            ranked.truncate(limit);
        }
        ranked.sort_by(rank_order);

        debug!(
            "Index search - probed {} list(s), examined {} candidate(s), returning {}",
            probed,
            examined,
            ranked.len()
        );

        Ok(ranked)
    }

    /// Train `k` centroids over the current entries and reassign every entry
    pub fn rebuild(&self, k: usize, options: &KMeansOptions) -> Result<RebuildStats> {
        if k == 0 {
            return Err(SemsearchError::invalid_parameter("cluster count must be greater than 0"));
        }

        // Train on a snapshot so searches keep running meanwhile
        let sample: Vec<Vec<f32>> = {
            let layout = self.layout.read();
            layout
                .lists
                .iter()
                .flat_map(|list| list.read().values().cloned().collect::<Vec<_>>())
                .collect()
        };
        let refs: Vec<&[f32]> = sample.iter().map(|v| v.as_slice()).collect();
        let centroids = kmeans::train(&refs, k, options);
        drop(sample);

        let stats = self.install_centroids(centroids)?;
        info!(
            "Index rebuilt - {} cluster(s) over {} entries",
            stats.clusters, stats.entries
        );
        Ok(stats)
    }

    /// Install previously persisted centroids
    pub fn restore_centroids(&self, centroids: Vec<Vec<f32>>) -> Result<RebuildStats> {
        let mut units = Vec::with_capacity(centroids.len());
        for c in centroids {
            validate_vector(&c)?;
            self.ensure_dimension(c.len())?;
            // Persisted centroids are already unit length; keep them bit-exact
            if (norm(&c) - 1.0).abs() > 1e-4 {
                units.push(normalized(&c)?);
            } else {
                units.push(c);
            }
        }
        self.install_centroids(units)
    }

    fn install_centroids(&self, centroids: Vec<Vec<f32>>) -> Result<RebuildStats> {
        let mut layout = self.layout.write();

        // A concurrent clear may have released the dimension the centroids were trained for
        if let Some(c) = centroids.first() {
            match self.dimension() {
                Some(d) if d == c.len() => {}
                Some(d) => return Err(SemsearchError::dimension_mismatch(d, c.len())),
                None => {
                    return Err(SemsearchError::internal(
                        "index was cleared while centroids were being trained",
                    ))
                }
            }
        }

        let mut entries: Vec<(String, Vec<f32>)> = Vec::with_capacity(self.len());
        for list in &layout.lists {
            entries.extend(list.write().drain());
        }

        let mut next = if centroids.is_empty() {
            Layout::flat()
        } else {
            Layout {
                lists: centroids.iter().map(|_| RwLock::new(HashMap::new())).collect(),
                centroids,
            }
        };

        let total = entries.len();
        let mut placed: Vec<HashMap<String, Vec<f32>>> =
            (0..next.lists.len()).map(|_| HashMap::new()).collect();
        for (id, unit) in entries {
            let list = next.list_for(&unit);
            self.shard(&id).write().insert(id.clone(), list);
            placed[list].insert(id, unit);
        }
        for (slot, list) in next.lists.iter_mut().zip(placed) {
            *slot.get_mut() = list;
        }

        let cluster_sizes: Vec<usize> = next.lists.iter_mut().map(|l| l.get_mut().len()).collect();
        let stats = RebuildStats {
            clusters: next.centroids.len(),
            cluster_sizes,
            entries: total,
        };
        *layout = next;
        Ok(stats)
    }

    fn shard(&self, id: &str) -> &RwLock<HashMap<String, usize>> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.assignments[(hasher.finish() as usize) % ASSIGNMENT_SHARDS]
    }
}

/// Descending score, then ascending id
fn rank_order(a: &(String, f32), b: &(String, f32)) -> std::cmp::Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
