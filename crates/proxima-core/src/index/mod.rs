//! Index implementations for approximate nearest-neighbor search.
//!
//! The [`VectorIndex`] trait is the narrow contract the rest of an
//! application programs against; [`HybridIndex`] is the HNSW +
//! product-quantization implementation behind it.

pub(crate) mod hnsw;
mod hybrid;
mod persistence;


pub use hybrid::{HybridIndex, IndexStats};

use crate::error::Result;

/// Narrow contract for an approximate nearest-neighbor index.
///
/// Implementations are safe for concurrent use: any number of searches
/// may run in parallel with inserts.
pub trait VectorIndex: Send + Sync {
    /// Inserts a vector under the given identifier.
    ///
    /// # Errors
    ///
    /// [`crate::Error::DimensionMismatch`], [`crate::Error::DuplicateId`]
    /// or [`crate::Error::CapacityExceeded`]; the index is unchanged on
    /// error.
    fn add(&self, id: i32, vector: &[f32]) -> Result<()>;

    /// Returns up to `k` results ordered by ascending distance.
    ///
    /// An empty index yields an empty result, not an error.
    ///
    /// # Errors
    ///
    /// [`crate::Error::DimensionMismatch`] if the query width is wrong.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i32, f32)>>;

    /// Removes a vector by identifier. Returns true if it was present.
    fn remove(&self, id: i32) -> bool;

    /// Drains the graph and re-inserts all stored vectors in ascending
    /// identifier order. Does not retrain the quantizer.
    fn rebuild(&self);

    /// Number of live vectors.
    fn len(&self) -> usize;

    /// Returns true if the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
