//! Tests for the product quantizer.

#![allow(clippy::cast_precision_loss)]

use crate::config::PqParams;
use crate::distance::euclid_sq;
use crate::error::Error;
use crate::pq::{CodeStore, ProductQuantizer};

fn small_params() -> PqParams {
    PqParams {
        subspaces: 4,
        bits_per_sub: 4, // 16 centroids keeps the tests fast
        iterations: 15,
        training_sample_target: 64,
    }
}

fn make_samples(count: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|i| {
            (0..dim)
                .map(|j| ((i * dim + j) as f32 * 0.013).sin())
                .collect()
        })
        .collect()
}

#[test]
fn test_train_then_encode() {
    let samples = make_samples(128, 16);
    let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

    let mut pq = ProductQuantizer::new(16, &small_params(), 42);
    assert!(!pq.is_trained());
    pq.train(&refs).unwrap();
    assert!(pq.is_trained());

    let codes = pq.encode(&samples[0]).unwrap();
    assert_eq!(codes.len(), 4);
    assert!(codes.iter().all(|&c| (c as usize) < 16));
}

#[test]
fn test_train_rejects_empty_sample() {
    let mut pq = ProductQuantizer::new(16, &small_params(), 42);
    let err = pq.train(&[]).unwrap_err();
    assert!(matches!(err, Error::EmptyTrainingSet));
}

#[test]
fn test_train_is_single_shot() {
    let samples = make_samples(32, 16);
    let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

    let mut pq = ProductQuantizer::new(16, &small_params(), 42);
    pq.train(&refs).unwrap();
    let err = pq.train(&refs).unwrap_err();
    assert!(matches!(err, Error::AlreadyTrained));
}

#[test]
fn test_encode_requires_training() {
    let pq = ProductQuantizer::new(16, &small_params(), 42);
    assert!(matches!(
        pq.encode(&vec![0.0; 16]).unwrap_err(),
        Error::QuantizerUntrained
    ));
    assert!(matches!(
        pq.build_table(&vec![0.0; 16]).unwrap_err(),
        Error::QuantizerUntrained
    ));
}

#[test]
fn test_training_is_deterministic() {
    let samples = make_samples(200, 16);
    let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

    let mut a = ProductQuantizer::new(16, &small_params(), 7);
    let mut b = ProductQuantizer::new(16, &small_params(), 7);
    a.train(&refs).unwrap();
    b.train(&refs).unwrap();

    for j in 0..4 {
        for ci in 0..16 {
            assert_eq!(
                a.centroid(j, ci),
                b.centroid(j, ci),
                "codebooks must be bit-identical for the same seed"
            );
        }
    }
}

#[test]
fn test_different_seeds_differ() {
    let samples = make_samples(200, 16);
    let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

    let mut a = ProductQuantizer::new(16, &small_params(), 1);
    let mut b = ProductQuantizer::new(16, &small_params(), 2);
    a.train(&refs).unwrap();
    b.train(&refs).unwrap();

    let same = (0..4).all(|j| (0..16).all(|ci| a.centroid(j, ci) == b.centroid(j, ci)));
    assert!(!same, "different seeds should produce different codebooks");
}

#[test]
fn test_adc_identity() {
    // ADC against the table must equal the per-subspace sum of exact
    // centroid distances, bit for bit.
    let samples = make_samples(100, 16);
    let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

    let mut pq = ProductQuantizer::new(16, &small_params(), 3);
    pq.train(&refs).unwrap();

    let query = &samples[17];
    let table = pq.build_table(query).unwrap();

    for sample in samples.iter().take(20) {
        let codes = pq.encode(sample).unwrap();
        let via_table = pq.distance(&table, &codes);

        let manual: f32 = codes
            .iter()
            .enumerate()
            .map(|(j, &c)| euclid_sq(&query[j * 4..(j + 1) * 4], pq.centroid(j, c as usize)))
            .sum();

        assert_eq!(via_table.to_bits(), manual.to_bits());
    }
}

#[test]
fn test_quantization_error_is_bounded() {
    // On clustered data the nearest-centroid reconstruction should sit
    // far closer than a random other sample.
    let samples = make_samples(256, 16);
    let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

    let mut pq = ProductQuantizer::new(16, &small_params(), 9);
    pq.train(&refs).unwrap();

    let v = &samples[5];
    let codes = pq.encode(v).unwrap();
    let reconstruction: Vec<f32> = codes
        .iter()
        .enumerate()
        .flat_map(|(j, &c)| pq.centroid(j, c as usize).to_vec())
        .collect();

    let err = euclid_sq(v, &reconstruction);
    let baseline = euclid_sq(v, &samples[200]);
    assert!(
        err < baseline,
        "reconstruction error {err} should beat unrelated sample {baseline}"
    );
}

#[test]
fn test_tiny_sample_pads_codebook() {
    // Fewer samples than centroids still yields a full codebook.
    let samples = make_samples(5, 16);
    let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

    let mut pq = ProductQuantizer::new(16, &small_params(), 11);
    pq.train(&refs).unwrap();

    for sample in &samples {
        let codes = pq.encode(sample).unwrap();
        assert_eq!(codes.len(), 4);
    }
}

#[test]
fn test_code_store_fill_is_idempotent() {
    let store = CodeStore::new(4, 16);
    store.fill_to(3, |row| Ok(vec![row as u8; 4])).unwrap();
    assert_eq!(store.encoded_rows(), 3);

    // second fill to the same target encodes nothing new
    store
        .fill_to(3, |_| panic!("must not re-encode"))
        .unwrap();

    store.fill_to(5, |row| Ok(vec![row as u8; 4])).unwrap();
    assert_eq!(store.encoded_rows(), 5);

    let rows = store.rows();
    assert_eq!(rows.row(0), &[0, 0, 0, 0]);
    assert_eq!(rows.row(4), &[4, 4, 4, 4]);
}

#[test]
fn test_compression_ratio() {
    // 16 floats (64 bytes) into 4 code bytes is 16x
    let pq = ProductQuantizer::new(16, &small_params(), 0);
    assert!((pq.compression_ratio() - 16.0).abs() < f32::EPSILON);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_codes_stay_in_range(seed in 0u64..1000) {
            let samples = make_samples(64, 16);
            let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

            let mut pq = ProductQuantizer::new(16, &small_params(), seed);
            pq.train(&refs).unwrap();

            for sample in &samples {
                let codes = pq.encode(sample).unwrap();
                prop_assert_eq!(codes.len(), 4);
                prop_assert!(codes.iter().all(|&c| (c as usize) < 16));
            }
        }

        #[test]
        fn prop_table_entries_are_nonnegative(qi in 0usize..64) {
            let samples = make_samples(64, 16);
            let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();

            let mut pq = ProductQuantizer::new(16, &small_params(), 4);
            pq.train(&refs).unwrap();

            let table = pq.build_table(&samples[qi]).unwrap();
            prop_assert!(table.iter().all(|&d| d >= 0.0));
        }
    }
}
