//! # Proxima Core
//!
//! In-process approximate nearest-neighbor retrieval over dense float
//! vectors.
//!
//! The engine combines a hierarchical navigable small world graph (HNSW)
//! with an optional product-quantization codec: the graph is built and
//! descended on exact distances, the wide bottom-layer sweep runs on
//! compressed codes once the quantizer is trained, and the final top-k is
//! re-ranked exactly from the full-precision store. Codes are 8-64x
//! smaller than the raw vectors at a few percent recall cost.
//!
//! ## Quick Start
//!
//! ```rust
//! use proxima_core::{HybridIndex, IndexConfig, VectorIndex};
//!
//! # fn main() -> proxima_core::Result<()> {
//! let index = HybridIndex::new(IndexConfig::new(4, 1000))?;
//!
//! index.add(1, &[0.1, 0.2, 0.3, 0.4])?;
//! index.add(2, &[0.9, 0.8, 0.7, 0.6])?;
//!
//! let results = index.search(&[0.1, 0.2, 0.3, 0.4], 1)?;
//! assert_eq!(results[0].0, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! [`HybridIndex`] is shared behind an `Arc`: searches run in parallel
//! with each other and with the candidate-gathering phase of inserts;
//! only the structural linking step takes the exclusive lock.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod distance;
pub mod error;
pub mod index;
pub mod pq;
pub mod simd;
pub mod store;

pub use config::{HnswParams, IndexConfig, PqParams, SearchParams};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use index::{HybridIndex, IndexStats, VectorIndex};

#[cfg(test)]
mod pq_tests;
