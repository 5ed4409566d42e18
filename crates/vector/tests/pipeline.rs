mod common;

use common::{payload, pool, source, MockEmbedder};
use semsearch_common::SemsearchError;
use semsearch_vector::{
    Filter, IngestConfig, IngestionPipeline, QueryConfig, QueryEngine, QueryOptions, SourceRecord,
    VectorStore,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn products() -> Vec<SourceRecord> {
    vec![
        source("p1", "oak desk with drawers", json!({"name": "Oak Desk", "price": 240, "category": "furniture"})),
        source("p2", "led desk lamp", json!({"name": "Desk Lamp", "price": 25, "category": "lighting"})),
        source("p3", "ergonomic office chair", json!({"name": "Chair", "price": 180, "category": "furniture"})),
        source("p4", "usb-c charging cable", json!({"name": "Cable", "price": 9, "category": "electronics"})),
        source("p5", "wireless keyboard", json!({"name": "Keyboard", "price": 45, "category": "electronics"})),
    ]
}

fn setup(embedder: MockEmbedder) -> (Arc<MockEmbedder>, Arc<VectorStore>, IngestionPipeline, QueryEngine) {
    let embedder = Arc::new(embedder);
    let collection = Arc::new(VectorStore::in_memory("products", "mock-embed"));
    let pipeline = IngestionPipeline::new(collection.clone(), pool(embedder.clone()), IngestConfig::default());
    let engine = QueryEngine::new(collection.clone(), pool(embedder.clone()), QueryConfig::default());
    (embedder, collection, pipeline, engine)
}

#[tokio::test]
async fn reseed_reports_partial_failure() {
    let (embedder, collection, pipeline, engine) =
        setup(MockEmbedder::new("mock-embed").failing_on("usb-c charging cable"));

    let report = pipeline.reseed(products(), &CancellationToken::new()).await.unwrap();
    assert_eq!(report.total, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);
    assert!(!report.cancelled);
    assert_eq!(report.failures[0].id, "p4");
    assert_eq!(report.failures[0].attempts, 3);
    // 4 successes + 3 attempts for the failing record
    assert_eq!(embedder.calls(), 7);

    let results = engine
        .query("desk", &QueryOptions::new(100).with_num_candidates(100))
        .await
        .unwrap();
    let ids: HashSet<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(results.len(), 4);
    assert_eq!(ids.len(), 4);
    assert!(!ids.contains("p4"));
    assert!(collection.check_consistency().is_consistent());
}

#[tokio::test]
async fn empty_query_never_calls_the_embedder() {
    let (embedder, _collection, _pipeline, engine) = setup(MockEmbedder::new("mock-embed"));

    for text in ["", "   \n"] {
        let err = engine.query(text, &QueryOptions::new(5)).await.unwrap_err();
        assert!(matches!(err, SemsearchError::InvalidQuery(_)));
    }
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn query_parameters_are_validated_before_embedding() {
    let (embedder, _collection, _pipeline, engine) = setup(MockEmbedder::new("mock-embed"));

    let zero = engine.query("lamp", &QueryOptions::new(0)).await.unwrap_err();
    assert!(matches!(zero, SemsearchError::InvalidParameter(_)));

    let small_budget = QueryOptions::new(10).with_num_candidates(5);
    let err = engine.query("lamp", &small_budget).await.unwrap_err();
    assert!(matches!(err, SemsearchError::InvalidParameter(_)));
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn query_ranks_filters_and_projects() {
    let embedder = MockEmbedder::new("mock-embed")
        .with_vector("A", vec![1.0, 0.0])
        .with_vector("B", vec![0.9, 0.1])
        .with_vector("C", vec![0.0, 1.0])
        .with_vector("east", vec![1.0, 0.0]);
    let (_embedder, _collection, pipeline, engine) = setup(embedder);

    let records = vec![
        source("A", "A", json!({"name": "alpha", "stock": 0})),
        source("B", "B", json!({"name": "beta", "stock": 4})),
        source("C", "C", json!({"name": "gamma", "stock": 9})),
    ];
    let report = pipeline.reseed(records, &CancellationToken::new()).await.unwrap();
    assert!(report.is_complete());

    let top = engine.query("east", &QueryOptions::new(2)).await.unwrap();
    let ids: Vec<&str> = top.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert!(top[0].score >= top[1].score);

    let in_stock = QueryOptions::new(2)
        .with_filter(Filter::parse("stock>0").unwrap())
        .with_projection(["name"]);
    let filtered = engine.query("east", &in_stock).await.unwrap();
    let ids: Vec<&str> = filtered.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["B", "C"]);
    assert_eq!(filtered[0].payload, payload(json!({"name": "beta"})));

    let direct = engine.query_vector(&[0.0, 1.0], &QueryOptions::new(1)).unwrap();
    assert_eq!(direct[0].id, "C");
}

#[tokio::test]
async fn incremental_ingest_skips_unchanged_records() {
    let (embedder, collection, pipeline, _engine) = setup(MockEmbedder::new("mock-embed"));
    let cancel = CancellationToken::new();

    pipeline.ingest(products(), &cancel).await.unwrap();
    assert_eq!(embedder.calls(), 5);

    let mut changed = products();
    changed[1].text = "led desk lamp, dimmable".to_string();
    let report = pipeline.ingest(changed, &cancel).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 4);
    assert_eq!(embedder.calls(), 6);
    assert_eq!(collection.get("p2").unwrap().version, 2);
    assert_eq!(collection.get("p1").unwrap().version, 1);
}

#[tokio::test]
async fn records_without_ids_get_generated_ones() {
    let (_embedder, collection, pipeline, _engine) = setup(MockEmbedder::new("mock-embed"));
    let records = vec![
        SourceRecord::new(None, payload(json!({"n": 1})), "first"),
        SourceRecord::new(None, payload(json!({"n": 2})), "second"),
        SourceRecord::new(None, payload(json!({"n": 3})), "  "),
    ];

    let report = pipeline.reseed(records, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].attempts, 0);

    let ids = collection.ids();
    assert_eq!(ids.len(), 2);
    assert!(ids.iter().all(|id| uuid::Uuid::parse_str(id).is_ok()));
}

#[tokio::test]
async fn reseed_replaces_previous_contents_and_retags() {
    let first = Arc::new(MockEmbedder::new("model-a"));
    let collection = Arc::new(VectorStore::in_memory("products", "model-a"));
    let pipeline = IngestionPipeline::new(collection.clone(), pool(first), IngestConfig::default());
    pipeline.reseed(products(), &CancellationToken::new()).await.unwrap();
    assert_eq!(collection.len(), 5);

    let second = Arc::new(MockEmbedder::new("model-b"));
    let engine = QueryEngine::new(collection.clone(), pool(second.clone()), QueryConfig::default());
    let err = engine.query("desk", &QueryOptions::new(3)).await.unwrap_err();
    assert!(matches!(err, SemsearchError::IncompatibleModel { .. }));
    assert_eq!(second.calls(), 0);

    let incremental = IngestionPipeline::new(collection.clone(), pool(second.clone()), IngestConfig::default());
    let err = incremental.ingest(products(), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SemsearchError::IncompatibleModel { .. }));

    let report = incremental
        .reseed(products()[..2].to_vec(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(collection.embedding_model(), "model-b");
    assert_eq!(collection.ids(), vec!["p1", "p2"]);
    assert_eq!(engine.query("desk", &QueryOptions::new(3)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn cancelled_reseed_starts_nothing() {
    let (embedder, collection, pipeline, engine) = setup(MockEmbedder::new("mock-embed"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = pipeline.reseed(products(), &cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.succeeded + report.failed, 0);
    assert_eq!(embedder.calls(), 0);
    assert!(collection.is_empty());

    let err = engine
        .query_cancellable("desk", &QueryOptions::new(1), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SemsearchError::Cancelled));
}

#[tokio::test]
async fn progress_is_reported_per_record() {
    let (_embedder, _collection, pipeline, _engine) = setup(MockEmbedder::new("mock-embed"));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let pipeline = pipeline.with_progress(move |done, total| {
        assert!(done <= total);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    pipeline.reseed(products(), &CancellationToken::new()).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 5);
}
