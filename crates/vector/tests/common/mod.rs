#![allow(dead_code)]

use async_trait::async_trait;
use semsearch_embed::{EmbedError, EmbedPool, Embedder, RetryPolicy};
use semsearch_vector::{Payload, SourceRecord};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const DIM: usize = 8;

/// Deterministic in-process embedder
///
/// Texts listed in `vectors` map to fixed vectors; texts in `failing` always
/// fail with `Unavailable`; anything else gets a bag-of-bytes vector.
pub struct MockEmbedder {
    model: String,
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            vectors: HashMap::new(),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn text_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[0] = 0.05;
    for b in text.bytes() {
        v[(b as usize) % DIM] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(text) {
            return Err(EmbedError::Unavailable("backend down".to_string()));
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| text_vector(text)))
    }
}

pub fn pool(embedder: Arc<MockEmbedder>) -> EmbedPool {
    EmbedPool::new(embedder, 4, RetryPolicy::immediate(3))
}

pub fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

pub fn source(id: &str, text: &str, extra: Value) -> SourceRecord {
    SourceRecord::new(Some(id.to_string()), payload(extra), text)
}
