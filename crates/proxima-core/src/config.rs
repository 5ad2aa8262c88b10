//! Index configuration: graph, quantizer, and search-time parameters.
//!
//! A configuration is immutable once the index is constructed. Use
//! [`IndexConfig::new`] for a plain exact-distance index and
//! [`IndexConfig::with_pq`] to enable product quantization with a subspace
//! count derived from the dimension.

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};

/// HNSW graph parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Number of bi-directional links per node at layers above 0 (M).
    /// Layer 0 holds up to twice this. Higher = better recall, more
    /// memory, slower insert.
    pub max_connections: usize,
    /// Size of the dynamic candidate list during construction.
    pub ef_construction: usize,
    /// Hard cap on the sampled node level.
    pub max_level: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 200,
            max_level: 16,
        }
    }
}

impl HnswParams {
    /// Level multiplier for the exponential level sampler, `1 / ln(M)`.
    #[must_use]
    pub fn level_mult(&self) -> f64 {
        1.0 / (self.max_connections as f64).ln()
    }
}

/// Product-quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqParams {
    /// Number of subspaces (m). Must divide the vector dimension.
    pub subspaces: usize,
    /// Bits per subspace code. 8 gives 256 centroids and one byte per
    /// subspace, the standard setting.
    pub bits_per_sub: u32,
    /// Maximum K-means iterations per subspace.
    pub iterations: usize,
    /// Number of vectors to buffer before training triggers.
    pub training_sample_target: usize,
}

impl PqParams {
    /// Picks a subspace count for `dimension` so that the subspace width
    /// lands in [4, 16], preferring 8.
    ///
    /// Falls back to one dimension per subspace when nothing in that range
    /// splits `dimension` into at least two subspaces (prime or very small
    /// dimensions).
    #[must_use]
    pub fn for_dimension(dimension: usize) -> Self {
        let sub_dim = [8, 4, 16, 6, 12, 5, 10, 7, 14, 9, 11, 13, 15]
            .into_iter()
            .find(|&w| dimension % w == 0 && dimension / w >= 2)
            .unwrap_or(1);

        Self {
            subspaces: dimension / sub_dim,
            bits_per_sub: 8,
            iterations: 25,
            training_sample_target: 10_000,
        }
    }

    /// Number of centroids per subspace, `2^bits_per_sub`.
    #[must_use]
    pub fn centroids_per_sub(&self) -> usize {
        1usize << self.bits_per_sub
    }
}

/// Search-time parameters controlling the recall/latency tradeoff.
///
/// The beam width at layer 0 is derived from both `k` and the current
/// index size: recall rises steeply with the fraction of the dataset
/// visited until roughly 10-15%, then plateaus, so the width tracks
/// `max(k * k_mult, ceil(n * pool_ratio), base_ef)` capped at `max_ef`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Multiplier applied to `k` when sizing the beam.
    pub k_mult: usize,
    /// Fraction of the dataset the beam should cover.
    pub pool_ratio: f32,
    /// Lower bound on the beam width.
    pub base_ef: usize,
    /// Upper bound on the beam width; bounds latency on huge indexes.
    pub max_ef: usize,
    /// Candidate pool size as a multiple of `k`.
    pub pool_mult: usize,
    /// Number of pool entries re-ranked with exact distances, as a
    /// multiple of `k`.
    pub refine_mult: usize,
    /// Cap on candidate expansions as a multiple of the beam width;
    /// bounds worst-case latency on pathological graphs.
    pub expansions_mult: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k_mult: 100,
            pool_ratio: 0.12,
            base_ef: 128,
            max_ef: 5000,
            pool_mult: 200,
            refine_mult: 20,
            expansions_mult: 4,
        }
    }
}

impl SearchParams {
    /// Beam width for a search of `k` results over `n` stored vectors.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn effective_ef(&self, k: usize, n: usize) -> usize {
        let by_k = k * self.k_mult;
        let by_n = (n as f32 * self.pool_ratio).ceil() as usize;
        by_k.max(by_n).max(self.base_ef).min(self.max_ef)
    }

    /// Candidate pool size for a search of `k` results over `n` vectors.
    #[must_use]
    pub fn pool_size(&self, k: usize, n: usize) -> usize {
        (k * self.pool_mult).min(n)
    }
}

/// Immutable configuration of a hybrid index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector dimension (D).
    pub dimension: usize,
    /// Maximum number of vectors the index will accept.
    pub capacity: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Graph parameters.
    pub hnsw: HnswParams,
    /// Quantizer parameters; `None` disables product quantization and the
    /// index runs on exact distances throughout.
    pub pq: Option<PqParams>,
    /// Search-time parameters.
    pub search: SearchParams,
    /// Global RNG seed for level sampling and K-means.
    pub seed: u64,
}

impl IndexConfig {
    /// Creates a configuration without product quantization.
    #[must_use]
    pub fn new(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            capacity,
            metric: DistanceMetric::Euclidean,
            hnsw: HnswParams::default(),
            pq: None,
            search: SearchParams::default(),
            seed: 0x51_7C_C1B7_2722_0A95,
        }
    }

    /// Creates a configuration with product quantization enabled, the
    /// subspace count computed from the dimension.
    #[must_use]
    pub fn with_pq(dimension: usize, capacity: usize) -> Self {
        let mut config = Self::new(dimension, capacity);
        config.pq = Some(PqParams::for_dimension(dimension));
        config
    }

    /// Sets the distance metric.
    #[must_use]
    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Validates internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a field is out of range or the PQ
    /// subspace count does not divide the dimension.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be positive".to_string()));
        }
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be positive".to_string()));
        }
        if self.hnsw.max_connections < 2 {
            return Err(Error::Config(
                "max_connections must be at least 2".to_string(),
            ));
        }
        if self.hnsw.ef_construction == 0 {
            return Err(Error::Config("ef_construction must be positive".to_string()));
        }
        if let Some(pq) = &self.pq {
            if pq.subspaces == 0 || self.dimension % pq.subspaces != 0 {
                return Err(Error::Config(format!(
                    "subspace count {} must divide dimension {}",
                    pq.subspaces, self.dimension
                )));
            }
            if pq.bits_per_sub == 0 || pq.bits_per_sub > 8 {
                return Err(Error::Config(
                    "bits_per_sub must be in 1..=8".to_string(),
                ));
            }
            if pq.iterations == 0 {
                return Err(Error::Config("iterations must be positive".to_string()));
            }
        }
        Ok(())
    }
}
