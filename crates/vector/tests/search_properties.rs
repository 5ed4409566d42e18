use proptest::prelude::*;
use semsearch_common::SemsearchError;
use semsearch_vector::{KMeansOptions, Payload, SimilarityIndex, VectorStore};
use std::collections::HashSet;

fn nonzero_vectors(dim: usize, max: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(
        prop::collection::vec(-1.0f32..1.0, dim)
            .prop_filter("non-zero", |v| v.iter().map(|x| x * x).sum::<f32>() > 1e-3),
        1..max,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn results_are_ranked_and_unique(
        vectors in nonzero_vectors(4, 60),
        query in prop::collection::vec(-1.0f32..1.0, 4)
            .prop_filter("non-zero", |v| v.iter().map(|x| x * x).sum::<f32>() > 1e-3),
        limit in 1usize..20,
    ) {
        let index = SimilarityIndex::new(None);
        for (i, v) in vectors.iter().enumerate() {
            index.add(&format!("v{}", i), v).unwrap();
        }

        let hits = index.search(&query, vectors.len().max(limit), limit).unwrap();
        prop_assert_eq!(hits.len(), limit.min(vectors.len()));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].1 >= pair[1].1);
        }
        let unique: HashSet<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        prop_assert_eq!(unique.len(), hits.len());
        for (_, score) in &hits {
            prop_assert!((-1.0..=1.0).contains(score));
        }
    }

    #[test]
    fn added_vector_is_its_own_nearest_neighbor(vectors in nonzero_vectors(6, 40)) {
        let index = SimilarityIndex::new(None);
        for (i, v) in vectors.iter().enumerate() {
            index.add(&format!("v{}", i), v).unwrap();
        }

        for (i, v) in vectors.iter().enumerate() {
            let hits = index.search(v, vectors.len(), 1).unwrap();
            prop_assert!(hits[0].1 > 0.9999);
            // Other vectors may point the same way; the query itself must score as high
            let own = index.search(v, vectors.len(), vectors.len()).unwrap();
            let id = format!("v{}", i);
            let found = own.iter().find(|(hit, _)| *hit == id).map(|(_, s)| *s);
            prop_assert!(found.is_some_and(|s| s > 0.9999));
        }
    }

    #[test]
    fn removed_ids_never_return(
        vectors in nonzero_vectors(4, 40),
        remove_mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let index = SimilarityIndex::new(None);
        for (i, v) in vectors.iter().enumerate() {
            index.add(&format!("v{}", i), v).unwrap();
        }
        let removed: HashSet<String> = (0..vectors.len())
            .filter(|i| remove_mask[*i])
            .map(|i| format!("v{}", i))
            .collect();
        for id in &removed {
            prop_assert!(index.remove(id));
        }

        for v in &vectors {
            let hits = index.search(v, vectors.len(), vectors.len()).unwrap();
            prop_assert_eq!(hits.len(), vectors.len() - removed.len());
            prop_assert!(hits.iter().all(|(id, _)| !removed.contains(id)));
        }
    }
}

#[test]
fn two_dimensional_ordering() {
    let index = SimilarityIndex::new(None);
    index.add("A", &[1.0, 0.0]).unwrap();
    index.add("B", &[0.9, 0.1]).unwrap();
    index.add("C", &[0.0, 1.0]).unwrap();

    let hits = index.search(&[1.0, 0.0], 3, 2).unwrap();
    let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert!((hits[0].1 - 1.0).abs() < 1e-6);
}

#[test]
fn repeated_upserts_never_duplicate_results() {
    let store = VectorStore::in_memory("dupes", "m");
    for round in 0..5 {
        for i in 0..10 {
            let angle = (i as f32) * 0.3 + round as f32 * 0.01;
            store
                .upsert(&format!("r{}", i), vec![angle.cos(), angle.sin()], Payload::new())
                .unwrap();
        }
    }

    assert_eq!(store.len(), 10);
    assert_eq!(store.get("r3").unwrap().version, 5);
    let hits = store.search(&[1.0, 0.0], 50, 50).unwrap();
    assert_eq!(hits.len(), 10);
    let unique: HashSet<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(unique.len(), 10);
}

#[test]
fn clustered_search_is_exact_with_full_budget() {
    let store = VectorStore::in_memory("clusters", "m");
    let mut vectors = Vec::new();
    for i in 0..200 {
        let angle = i as f32 * 0.0314;
        let v = vec![angle.cos(), angle.sin(), (i % 7) as f32 * 0.1];
        store.upsert(&format!("p{:03}", i), v.clone(), Payload::new()).unwrap();
        vectors.push(v);
    }

    let query = [0.3, 0.9, 0.2];
    let before = store.search(&query, 200, 10).unwrap();

    let options = KMeansOptions {
        seed: Some(11),
        ..KMeansOptions::default()
    };
    let stats = store.rebuild_clusters(8, &options).unwrap();
    assert_eq!(stats.entries, 200);
    assert_eq!(stats.cluster_sizes.iter().sum::<usize>(), 200);

    let after = store.search(&query, 200, 10).unwrap();
    let ids = |hits: &[(String, f32)]| hits.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&before), ids(&after));

    // A narrow budget still returns ranked, unique hits
    let narrow = store.search(&query, 10, 10).unwrap();
    assert!(!narrow.is_empty());
    assert!(narrow.windows(2).all(|p| p[0].1 >= p[1].1));
    assert!(store.check_consistency().is_consistent());
}

#[test]
fn invalid_search_parameters_are_rejected() {
    let store = VectorStore::in_memory("params", "m");
    store.upsert("a", vec![1.0, 0.0], Payload::new()).unwrap();

    assert!(matches!(
        store.search(&[1.0, 0.0], 10, 0),
        Err(SemsearchError::InvalidParameter(_))
    ));
    assert!(matches!(
        store.search(&[1.0, 0.0], 1, 2),
        Err(SemsearchError::InvalidParameter(_))
    ));
    assert!(matches!(
        store.search(&[0.0, 0.0], 10, 1),
        Err(SemsearchError::InvalidVector(_))
    ));
    assert!(matches!(
        store.search(&[1.0, 0.0, 0.0], 10, 1),
        Err(SemsearchError::DimensionMismatch { expected: 2, actual: 3 })
    ));
}
