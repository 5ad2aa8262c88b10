//! Hierarchical navigable small world graph.
//!
//! This module holds the graph topology and traversal algorithms. The
//! hybrid coordinator in [`crate::index::hybrid`] owns the locking
//! discipline and the choice of distance oracle; everything here is
//! lock-free data structure plus pure algorithm.
//!
//! # Module Organization
//!
//! - `graph`: multi-layer adjacency, level sampler, greedy descent, beam
//!   search, neighbor selection, insert planning/commit, removal
//! - `ordered_float`: total-ordering wrapper for distance heaps
//! - `visited`: per-thread generation-stamped visited set

pub(crate) mod graph;
mod ordered_float;
pub(crate) mod visited;
