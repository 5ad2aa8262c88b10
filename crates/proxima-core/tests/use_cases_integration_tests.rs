//! End-to-end use cases exercised through the public API only.

#![allow(clippy::cast_precision_loss)]

use proxima_core::{Error, HybridIndex, IndexConfig, VectorIndex};

fn sin_vector(i: usize, dim: usize) -> Vec<f32> {
    (0..dim).map(|j| (i as f32 + 0.1 * j as f32).sin()).collect()
}

#[test]
fn test_capacity_boundary() {
    // ten slots, ten inserts, the eleventh bounces
    let index = HybridIndex::new(IndexConfig::new(8, 10)).unwrap();

    for i in 0..10 {
        index.add(i, &sin_vector(i as usize, 8)).unwrap();
        index.check_invariants().unwrap();
    }
    assert_eq!(index.len(), 10);

    let err = index.add(10, &sin_vector(10, 8)).unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded(10)));
    assert_eq!(index.len(), 10, "failed insert must not mutate");
    index.check_invariants().unwrap();
}

#[test]
fn test_duplicate_insert() {
    let index = HybridIndex::new(IndexConfig::new(8, 10)).unwrap();
    index.add(7, &sin_vector(7, 8)).unwrap();

    let err = index.add(7, &sin_vector(8, 8)).unwrap_err();
    assert!(matches!(err, Error::DuplicateId(7)));
    assert_eq!(index.len(), 1);
    index.check_invariants().unwrap();
}

#[test]
fn test_remove_then_search() {
    let index = HybridIndex::new(IndexConfig::new(16, 200)).unwrap();
    for i in 0..100 {
        index.add(i, &sin_vector(i as usize, 16)).unwrap();
    }

    assert!(index.remove(50));
    assert_eq!(index.len(), 99);
    index.check_invariants().unwrap();

    let results = index.search(&sin_vector(50, 16), 10).unwrap();
    assert!(!results.is_empty());
    assert!(
        results.iter().all(|&(id, _)| id != 50),
        "removed id must not surface"
    );

    // the rest of the index is still fully reachable
    for probe in [0, 25, 75, 99] {
        let hits = index.search(&sin_vector(probe as usize, 16), 1).unwrap();
        assert_eq!(hits[0].0, probe);
    }
}

#[test]
fn test_add_remove_interleaving_holds_invariants() {
    let index = HybridIndex::new(IndexConfig::new(8, 300)).unwrap();

    for round in 0..5 {
        let base = round * 40;
        for i in base..base + 40 {
            index.add(i, &sin_vector(i as usize, 8)).unwrap();
        }
        for i in (base..base + 40).step_by(4) {
            assert!(index.remove(i));
        }
        index.check_invariants().unwrap();
    }

    assert_eq!(index.len(), 5 * 40 - 5 * 10);
}

#[test]
fn test_rebuild_after_heavy_deletion() {
    let index = HybridIndex::new(IndexConfig::new(8, 400)).unwrap();
    for i in 0..200 {
        index.add(i, &sin_vector(i as usize, 8)).unwrap();
    }
    for i in 0..200 {
        if i % 2 == 0 {
            index.remove(i);
        }
    }
    index.check_invariants().unwrap();

    index.rebuild();
    index.check_invariants().unwrap();
    assert_eq!(index.len(), 100);

    let results = index.search(&sin_vector(101, 8), 5).unwrap();
    assert_eq!(results[0].0, 101);
}

#[test]
fn test_trait_object_usage() {
    // the coordinator stays usable through the narrow trait
    let index: Box<dyn VectorIndex> =
        Box::new(HybridIndex::new(IndexConfig::new(4, 50)).unwrap());

    index.add(1, &[0.0, 0.0, 0.0, 1.0]).unwrap();
    index.add(2, &[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(index.len(), 2);

    let results = index.search(&[0.9, 0.0, 0.0, 0.1], 1).unwrap();
    assert_eq!(results[0].0, 2);
    assert!(index.remove(1));
    assert_eq!(index.len(), 1);
}
