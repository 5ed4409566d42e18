use semsearch_common::{AppConfig, Result, SemsearchError};
use semsearch_embed::{EmbedError, EmbedPool, PoolError};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::filter::Filter;
use crate::types::{Payload, QueryResult};
use crate::vector_store::VectorStore;

/// Candidate budget defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// numCandidates = max(limit * candidate_factor, candidate_floor)
    pub candidate_factor: usize,
    pub candidate_floor: usize,

    /// Budget multiplier when results are post-filtered
    pub filter_overfetch: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            candidate_factor: 10,
            candidate_floor: 100,
            filter_overfetch: 4,
        }
    }
}

impl QueryConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            candidate_factor: config.candidate_factor,
            candidate_floor: config.candidate_floor,
            filter_overfetch: config.filter_overfetch,
        }
    }

    /// Default candidate budget for `limit`
    pub fn num_candidates(&self, limit: usize, filtered: bool) -> usize {
        let base = limit
            .saturating_mul(self.candidate_factor)
            .max(self.candidate_floor)
            .max(limit);
        if filtered {
            base.saturating_mul(self.filter_overfetch.max(1))
        } else {
            base
        }
    }
}

/// Per-query knobs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Maximum results returned
    pub limit: usize,

    /// Vectors examined (None = derived from `limit`)
    pub num_candidates: Option<usize>,

    /// Post-ranking payload predicate
    pub filter: Option<Filter>,

    /// Payload fields to return (None = all)
    pub projection: Option<Vec<String>>,
}

impl QueryOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn with_num_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = Some(num_candidates);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_projection<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Text -> ranked records
///
/// Embeds through the shared pool, searches the collection's index, joins the
/// hits back to stored payloads, filters and projects.
#[derive(Clone)]
pub struct QueryEngine {
    collection: Arc<VectorStore>,
    pool: EmbedPool,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(collection: Arc<VectorStore>, pool: EmbedPool, config: QueryConfig) -> Self {
        Self {
            collection,
            pool,
            config,
        }
    }

    pub fn collection(&self) -> &Arc<VectorStore> {
        &self.collection
    }

    pub async fn query(&self, text: &str, options: &QueryOptions) -> Result<Vec<QueryResult>> {
        self.query_cancellable(text, options, &CancellationToken::new())
            .await
    }

    /// `query` that gives up with `Cancelled` once `cancel` fires
    pub async fn query_cancellable(
        &self,
        text: &str,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryResult>> {
        if text.trim().is_empty() {
            return Err(SemsearchError::invalid_query("query text is empty"));
        }
        self.resolve_candidates(options)?;
        self.collection.check_model(self.pool.model())?;

        let started = Instant::now();
        let embedded = self.pool.embed(text, cancel).await.map_err(|e| match e {
            PoolError::Failed {
                last: EmbedError::InvalidInput(reason),
                ..
            } => SemsearchError::invalid_query(reason),
            other => other.into_error(None),
        })?;
        debug!(
            "Query embedded in {:?} ({} attempt(s))",
            started.elapsed(),
            embedded.attempts
        );

        self.query_vector(&embedded.vector, options)
    }

    /// Same pipeline from a precomputed query vector
    pub fn query_vector(&self, vector: &[f32], options: &QueryOptions) -> Result<Vec<QueryResult>> {
        let num_candidates = self.resolve_candidates(options)?;
        let filter = options.filter.as_ref();

        // Filtering discards hits, so keep the whole candidate set ranked
        let fetch = if filter.is_some() {
            num_candidates
        } else {
            options.limit
        };

        let started = Instant::now();
        let hits = self.collection.search(vector, num_candidates, fetch)?;
        let examined = hits.len();

        let mut results = Vec::with_capacity(options.limit.min(examined));
        for (id, score) in hits {
            if results.len() == options.limit {
                break;
            }
            // None when a concurrent delete removed the record after ranking
            let joined = self
                .collection
                .with_payload(&id, |payload| {
                    filter
                        .map_or(true, |f| f.matches(payload))
                        .then(|| project(payload, options.projection.as_deref()))
                })
                .flatten();
            if let Some(payload) = joined {
                results.push(QueryResult { id, payload, score });
            }
        }

        info!(
            "Query returned {} result(s) from {} ranked hit(s) in {:?}",
            results.len(),
            examined,
            started.elapsed()
        );
        Ok(results)
    }

    fn resolve_candidates(&self, options: &QueryOptions) -> Result<usize> {
        if options.limit == 0 {
            return Err(SemsearchError::invalid_parameter("limit must be greater than 0"));
        }
        match options.num_candidates {
            Some(n) if n < options.limit => Err(SemsearchError::invalid_parameter(format!(
                "num_candidates ({}) must be at least limit ({})",
                n, options.limit
            ))),
            Some(n) => Ok(n),
            None => Ok(self
                .config
                .num_candidates(options.limit, options.filter.is_some())),
        }
    }
}

fn project(payload: &Payload, fields: Option<&[String]>) -> Payload {
    match fields {
        None => payload.clone(),
        Some(fields) => fields
            .iter()
            .filter_map(|f| payload.get(f).map(|v| (f.clone(), v.clone())))
            .collect(),
    }
}
