//! Product quantization: subspace K-means codebooks, byte codes, and
//! asymmetric distance tables.
//!
//! A vector of dimension D is split into `m` contiguous subspaces of
//! width D/m; each subspace is quantized independently to the index of
//! its nearest centroid, giving one byte per subspace at the default 256
//! centroids. A query builds a `[subspace][centroid]` table of exact
//! squared distances once, after which the distance to any stored code is
//! `m` table lookups.
//!
//! Training is reproducible: each subspace derives its RNG stream from
//! (global seed, subspace index), so identical samples and seed produce
//! identical codebooks.

use parking_lot::{RwLock, RwLockReadGuard};
use rayon::prelude::*;

use crate::config::PqParams;
use crate::distance::{adc, euclid_sq};
use crate::error::{Error, Result};
use crate::simd;

/// Deterministic xorshift64 stream for one subspace.
///
/// The state is seeded through a SplitMix64 scramble of the global seed
/// and the subspace index, which decorrelates the per-subspace streams
/// even for adjacent indices.
struct SubspaceRng {
    state: u64,
}

impl SubspaceRng {
    fn new(seed: u64, subspace: u64) -> Self {
        let mut z = seed ^ subspace.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Self {
            state: z | 1, // xorshift must not start at zero
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform draw in [0, 1).
    #[allow(clippy::cast_precision_loss)]
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform draw in [0, n).
    #[allow(clippy::cast_possible_truncation)]
    fn next_index(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Trained product quantizer.
///
/// Codebooks are written exactly once by [`ProductQuantizer::train`] and
/// frozen for the lifetime of the index afterwards.
#[derive(Debug)]
pub struct ProductQuantizer {
    dimension: usize,
    subspaces: usize,
    sub_dim: usize,
    centroids_per_sub: usize,
    iterations: usize,
    seed: u64,
    /// Flattened `[subspace][centroid][sub_dim]` table.
    codebooks: Vec<f32>,
    trained: bool,
}

impl ProductQuantizer {
    /// Creates an untrained quantizer for `dimension`-wide vectors.
    ///
    /// The caller validates that `params.subspaces` divides `dimension`
    /// (see `IndexConfig::validate`).
    #[must_use]
    pub fn new(dimension: usize, params: &PqParams, seed: u64) -> Self {
        let centroids_per_sub = params.centroids_per_sub();
        Self {
            dimension,
            subspaces: params.subspaces,
            sub_dim: dimension / params.subspaces,
            centroids_per_sub,
            iterations: params.iterations,
            seed,
            codebooks: Vec::new(),
            trained: false,
        }
    }

    /// Returns true once codebooks have been trained.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Returns the subspace count.
    #[must_use]
    pub fn subspaces(&self) -> usize {
        self.subspaces
    }

    /// Returns the number of centroids per subspace.
    #[must_use]
    pub fn centroids_per_sub(&self) -> usize {
        self.centroids_per_sub
    }

    /// Compression ratio of codes against raw f32 storage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compression_ratio(&self) -> f32 {
        (self.dimension * std::mem::size_of::<f32>()) as f32 / self.subspaces as f32
    }

    /// Returns the centroid slice for (subspace, centroid index).
    #[inline]
    #[must_use]
    pub fn centroid(&self, subspace: usize, index: usize) -> &[f32] {
        let offset = (subspace * self.centroids_per_sub + index) * self.sub_dim;
        &self.codebooks[offset..offset + self.sub_dim]
    }

    /// Trains one codebook per subspace on the given samples.
    ///
    /// Subspaces are independent and train in parallel. Codebooks are
    /// frozen after this call.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyTrained`] if called twice, [`Error::EmptyTrainingSet`]
    /// when `samples` is empty.
    pub fn train(&mut self, samples: &[&[f32]]) -> Result<()> {
        if self.trained {
            return Err(Error::AlreadyTrained);
        }
        if samples.is_empty() {
            return Err(Error::EmptyTrainingSet);
        }

        let sub_dim = self.sub_dim;
        let c = self.centroids_per_sub;
        let iterations = self.iterations;
        let seed = self.seed;

        let per_subspace: Vec<Vec<f32>> = (0..self.subspaces)
            .into_par_iter()
            .map(|j| {
                // Slice out this subspace from every sample into a
                // contiguous buffer so K-means runs on dense rows.
                let mut sub_samples = Vec::with_capacity(samples.len() * sub_dim);
                for sample in samples {
                    sub_samples.extend_from_slice(&sample[j * sub_dim..(j + 1) * sub_dim]);
                }

                let mut rng = SubspaceRng::new(seed, j as u64);
                kmeans_subspace(&sub_samples, sub_dim, c, iterations, &mut rng)
            })
            .collect();

        self.codebooks = per_subspace.concat();
        self.trained = true;
        Ok(())
    }

    /// Encodes a vector into one centroid index per subspace.
    ///
    /// # Errors
    ///
    /// [`Error::QuantizerUntrained`] before training.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if !self.trained {
            return Err(Error::QuantizerUntrained);
        }
        debug_assert_eq!(vector.len(), self.dimension);

        let mut codes = Vec::with_capacity(self.subspaces);
        for j in 0..self.subspaces {
            let sub = &vector[j * self.sub_dim..(j + 1) * self.sub_dim];

            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for ci in 0..self.centroids_per_sub {
                let dist = euclid_sq(sub, self.centroid(j, ci));
                if dist < best_dist {
                    best = ci;
                    best_dist = dist;
                }
            }
            #[allow(clippy::cast_possible_truncation)]
            codes.push(best as u8);
        }
        Ok(codes)
    }

    /// Builds the per-query distance table.
    ///
    /// Entry `j * C + c` holds the exact squared distance between the
    /// query's subspace `j` and centroid `c` of that subspace.
    ///
    /// # Errors
    ///
    /// [`Error::QuantizerUntrained`] before training.
    pub fn build_table(&self, query: &[f32]) -> Result<Vec<f32>> {
        if !self.trained {
            return Err(Error::QuantizerUntrained);
        }
        debug_assert_eq!(query.len(), self.dimension);

        let mut table = vec![0.0f32; self.subspaces * self.centroids_per_sub];
        for j in 0..self.subspaces {
            let sub = &query[j * self.sub_dim..(j + 1) * self.sub_dim];
            for ci in 0..self.centroids_per_sub {
                table[j * self.centroids_per_sub + ci] = euclid_sq(sub, self.centroid(j, ci));
            }
        }
        Ok(table)
    }

    /// Asymmetric distance between a query table and a stored code row.
    #[inline]
    #[must_use]
    pub fn distance(&self, table: &[f32], codes: &[u8]) -> f32 {
        adc(table, codes, self.centroids_per_sub)
    }

    /// Raw codebook buffer, for serialization.
    #[must_use]
    pub(crate) fn codebooks(&self) -> &[f32] {
        &self.codebooks
    }

    /// Restores a trained quantizer from a serialized codebook buffer.
    pub(crate) fn restore(&mut self, codebooks: Vec<f32>) {
        debug_assert_eq!(
            codebooks.len(),
            self.subspaces * self.centroids_per_sub * self.sub_dim
        );
        self.codebooks = codebooks;
        self.trained = true;
    }
}

/// K-means over one subspace's contiguous sample buffer.
///
/// Returns a flattened `[centroids][sub_dim]` codebook. Seeding is the
/// classical K-means++ form: the first centroid is drawn uniformly, each
/// further centroid with probability proportional to the squared distance
/// to the nearest already-chosen centroid. Empty clusters keep their
/// previous centroid; iteration stops early once no assignment changes.
fn kmeans_subspace(
    data: &[f32],
    sub_dim: usize,
    centroids: usize,
    iterations: usize,
    rng: &mut SubspaceRng,
) -> Vec<f32> {
    let n = data.len() / sub_dim;
    let sample = |i: usize| &data[i * sub_dim..(i + 1) * sub_dim];

    // --- K-means++ seeding ---
    let distinct = centroids.min(n);
    let mut codebook = Vec::with_capacity(centroids * sub_dim);
    codebook.extend_from_slice(sample(rng.next_index(n)));

    // min squared distance from each sample to the chosen set
    let mut weights: Vec<f32> = (0..n)
        .map(|i| euclid_sq(sample(i), &codebook[..sub_dim]))
        .collect();

    for _ in 1..distinct {
        let total: f64 = weights.iter().map(|&w| f64::from(w)).sum();
        let picked = if total > 0.0 {
            let mut target = rng.next_f64() * total;
            let mut picked = n - 1;
            for (i, &w) in weights.iter().enumerate() {
                target -= f64::from(w);
                if target <= 0.0 {
                    picked = i;
                    break;
                }
            }
            picked
        } else {
            // all remaining samples coincide with chosen centroids
            rng.next_index(n)
        };

        let start = codebook.len();
        codebook.extend_from_slice(sample(picked));
        let new_centroid = codebook[start..start + sub_dim].to_vec();
        for (i, w) in weights.iter_mut().enumerate() {
            let d = euclid_sq(sample(i), &new_centroid);
            if d < *w {
                *w = d;
            }
        }
    }

    // Pad to the full centroid count when the sample is smaller than C.
    let mut pad = 0usize;
    while codebook.len() < centroids * sub_dim {
        let src = (pad % distinct) * sub_dim;
        let row: Vec<f32> = codebook[src..src + sub_dim].to_vec();
        codebook.extend_from_slice(&row);
        pad += 1;
    }

    // --- Lloyd iterations ---
    let mut assignment = vec![usize::MAX; n];
    for _ in 0..iterations {
        let mut changed = false;
        for i in 0..n {
            let s = sample(i);
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for ci in 0..centroids {
                let d = euclid_sq(s, &codebook[ci * sub_dim..(ci + 1) * sub_dim]);
                if d < best_dist {
                    best = ci;
                    best_dist = d;
                }
            }
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        let mut sums = vec![0.0f32; centroids * sub_dim];
        let mut counts = vec![0usize; centroids];
        for i in 0..n {
            let ci = assignment[i];
            counts[ci] += 1;
            for (d, &v) in sample(i).iter().enumerate() {
                sums[ci * sub_dim + d] += v;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        for ci in 0..centroids {
            if counts[ci] > 0 {
                let inv = 1.0 / counts[ci] as f32;
                for d in 0..sub_dim {
                    codebook[ci * sub_dim + d] = sums[ci * sub_dim + d] * inv;
                }
            }
            // empty cluster: previous centroid stays
        }
    }

    codebook
}

/// Contiguous storage for one code row per vector row.
///
/// Code rows are appended in row order; `encoded_rows` tracks how far the
/// backfill has progressed, which lets encoding lag vector appends and
/// catch up idempotently.
#[derive(Debug)]
pub struct CodeStore {
    codes: RwLock<Vec<u8>>,
    subspaces: usize,
}

impl CodeStore {
    /// Creates an empty code store for `subspaces`-byte rows.
    #[must_use]
    pub fn new(subspaces: usize, capacity: usize) -> Self {
        Self {
            codes: RwLock::new(Vec::with_capacity(subspaces * capacity)),
            subspaces,
        }
    }

    /// Number of rows encoded so far.
    #[must_use]
    pub fn encoded_rows(&self) -> usize {
        self.codes.read().len() / self.subspaces
    }

    /// Appends code rows produced by `encode` until `target_rows` rows are
    /// covered. Safe to call concurrently; the check runs under the write
    /// lock so rows are encoded exactly once.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::QuantizerUntrained`] from the encoder.
    pub fn fill_to(
        &self,
        target_rows: usize,
        mut encode: impl FnMut(usize) -> Result<Vec<u8>>,
    ) -> Result<()> {
        let mut codes = self.codes.write();
        let mut row = codes.len() / self.subspaces;
        while row < target_rows {
            let code = encode(row)?;
            debug_assert_eq!(code.len(), self.subspaces);
            codes.extend_from_slice(&code);
            row += 1;
        }
        Ok(())
    }

    /// Acquires a read guard for repeated code-row access.
    #[must_use]
    pub fn rows(&self) -> CodesGuard<'_> {
        CodesGuard {
            guard: self.codes.read(),
            subspaces: self.subspaces,
        }
    }

    /// Restores code rows from a serialized buffer.
    pub(crate) fn restore(&self, raw: Vec<u8>) {
        debug_assert_eq!(raw.len() % self.subspaces, 0);
        *self.codes.write() = raw;
    }
}

/// Read guard exposing borrowed code rows.
pub struct CodesGuard<'a> {
    guard: RwLockReadGuard<'a, Vec<u8>>,
    subspaces: usize,
}

impl CodesGuard<'_> {
    /// Returns the code row as a borrowed slice.
    ///
    /// # Panics
    ///
    /// Panics if the row has not been encoded.
    #[inline]
    #[must_use]
    pub fn row(&self, row: u32) -> &[u8] {
        let offset = row as usize * self.subspaces;
        &self.guard[offset..offset + self.subspaces]
    }

    /// Prefetches a code row through the held guard.
    #[inline]
    pub fn prefetch(&self, row: u32) {
        let offset = row as usize * self.subspaces;
        if offset + self.subspaces <= self.guard.len() {
            simd::prefetch_bytes(&self.guard[offset..offset + self.subspaces]);
        }
    }

    /// Raw code buffer, for serialization.
    #[must_use]
    pub(crate) fn raw(&self) -> &[u8] {
        &self.guard
    }
}
