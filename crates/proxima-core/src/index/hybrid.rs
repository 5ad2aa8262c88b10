//! Hybrid coordinator: HNSW traversal over product-quantized candidates
//! with exact re-ranking.
//!
//! The coordinator owns every mutable structure (vector store, code
//! store, quantizer, graph, id mappings) and enforces the locking
//! discipline:
//!
//! - `search` holds the graph's shared lock for its whole duration.
//! - `add` runs in three phases: (1) store append and code encode with no
//!   graph lock, (2) candidate gathering under the shared lock, (3)
//!   linking and entry-point publication under the exclusive lock.
//!   Readers are excluded only during phase 3.
//! - `remove` and `rebuild` take the exclusive lock throughout.
//!
//! The distance oracle differs by phase. Graph construction always uses
//! exact distances (building against quantized distances measurably
//! degrades the graph). Queries descend the upper layers with exact
//! distances too, matching the build oracle, and switch to asymmetric
//! table lookups for the wide bottom-layer sweep once the quantizer is
//! trained; the final candidates are re-ranked exactly from the store.

use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use super::hnsw::graph::{sample_level, GraphState, RowId};
use super::hnsw::visited::with_visited;
use super::VectorIndex;
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::pq::{CodeStore, ProductQuantizer};
use crate::store::VectorStore;

/// Sample buffer captured before quantizer training.
///
/// The explicit `Released` state makes the one-way transition visible:
/// once training has consumed the samples the memory is gone for good.
#[derive(Debug)]
pub(crate) enum TrainingBuffer {
    /// Still collecting; training has not run.
    Collecting(Vec<Vec<f32>>),
    /// Training consumed the buffer.
    Released,
}

/// Snapshot of index-level counters and quantizer state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexStats {
    /// Number of live vectors.
    pub size: usize,
    /// Vector dimension.
    pub dimension: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// True once the product quantizer is trained.
    pub pq_trained: bool,
    /// Bytes of raw vector per byte of code, when PQ is trained.
    pub compression_ratio: Option<f32>,
    /// Level of the current entry point.
    pub entry_level: Option<usize>,
}

/// Approximate nearest-neighbor index combining an HNSW graph with an
/// optional product-quantization codec.
///
/// See the module docs for the locking discipline. All methods take
/// `&self`; the index is meant to be shared across threads behind an
/// `Arc`.
#[derive(Debug)]
pub struct HybridIndex {
    config: IndexConfig,
    store: VectorStore,
    codes: Option<CodeStore>,
    pq: Option<RwLock<ProductQuantizer>>,
    graph: RwLock<GraphState>,
    /// Public-boundary mapping; hot loops never touch it.
    id_to_row: RwLock<FxHashMap<i32, RowId>>,
    /// Rows whose vector is live (not removed).
    alive: RwLock<RoaringBitmap>,
    /// Live-vector count, published with release semantics.
    size: AtomicUsize,
    /// Quantizer-trained flag, published with release semantics.
    trained: AtomicBool,
    /// xorshift64 state for the level sampler.
    level_rng: AtomicU64,
    training: Mutex<TrainingBuffer>,
}

impl HybridIndex {
    /// Creates an empty index from a validated configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the configuration is inconsistent.
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;

        let (pq, codes, training) = match &config.pq {
            Some(params) => (
                Some(RwLock::new(ProductQuantizer::new(
                    config.dimension,
                    params,
                    config.seed,
                ))),
                Some(CodeStore::new(params.subspaces, config.capacity)),
                TrainingBuffer::Collecting(Vec::new()),
            ),
            None => (None, None, TrainingBuffer::Released),
        };

        Ok(Self {
            store: VectorStore::new(config.dimension, config.capacity),
            codes,
            pq,
            graph: RwLock::new(GraphState::new(&config.hnsw)),
            id_to_row: RwLock::new(FxHashMap::default()),
            alive: RwLock::new(RoaringBitmap::new()),
            size: AtomicUsize::new(0),
            trained: AtomicBool::new(false),
            level_rng: AtomicU64::new(config.seed | 1),
            training: Mutex::new(training),
            config,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Returns true if the identifier is present.
    #[must_use]
    pub fn contains(&self, id: i32) -> bool {
        self.id_to_row.read().contains_key(&id)
    }

    /// Returns a copy of the stored vector for an identifier.
    #[must_use]
    pub fn vector(&self, id: i32) -> Option<Vec<f32>> {
        let row = *self.id_to_row.read().get(&id)?;
        self.store.get(row)
    }

    /// Returns true once the product quantizer is trained.
    #[must_use]
    pub fn is_pq_trained(&self) -> bool {
        self.trained.load(Ordering::Acquire)
    }

    /// Trains the product quantizer now, on the samples buffered so far.
    ///
    /// Normally training triggers itself when the buffer reaches the
    /// configured target; this forces it earlier.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyTrained`] after a previous training,
    /// [`Error::EmptyTrainingSet`] when nothing has been buffered. A
    /// PQ-disabled index reports [`Error::AlreadyTrained`] as well: its
    /// codec state is frozen by construction.
    pub fn train_pq(&self) -> Result<()> {
        self.train_from_buffer()
    }

    /// Index-level counters.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let trained = self.trained.load(Ordering::Acquire);
        let compression_ratio = match (&self.pq, trained) {
            (Some(pq), true) => Some(pq.read().compression_ratio()),
            _ => None,
        };
        IndexStats {
            size: self.size.load(Ordering::Acquire),
            dimension: self.config.dimension,
            capacity: self.config.capacity,
            pq_trained: trained,
            compression_ratio,
            entry_level: self.graph.read().entry_level().map(|(_, l)| l),
        }
    }

    /// Checks every structural invariant of the graph and the size
    /// accounting. Diagnostic surface used by the test suite.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupted`] describing the first violation found.
    pub fn check_invariants(&self) -> Result<()> {
        let graph = self.graph.read();
        graph.check_invariants().map_err(Error::Corrupted)?;

        let live_nodes = graph.nodes.iter().flatten().count();
        let size = self.size.load(Ordering::Acquire);
        if live_nodes != size {
            return Err(Error::Corrupted(format!(
                "graph holds {live_nodes} nodes but size is {size}"
            )));
        }

        if let Some(codes) = &self.codes {
            if self.trained.load(Ordering::Acquire) && codes.encoded_rows() < self.store.len() {
                return Err(Error::Corrupted(format!(
                    "{} rows stored but only {} encoded",
                    self.store.len(),
                    codes.encoded_rows()
                )));
            }
        }

        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Trains the quantizer from the buffered samples and back-encodes
    /// every stored row. Runs under the exclusive graph lock so no search
    /// or graph phase observes half-written codebooks.
    fn train_from_buffer(&self) -> Result<()> {
        let Some(pq_lock) = &self.pq else {
            return Err(Error::AlreadyTrained);
        };

        let graph = self.graph.write();
        let mut buffer = self.training.lock();
        let TrainingBuffer::Collecting(samples) = &*buffer else {
            return Err(Error::AlreadyTrained);
        };
        if samples.is_empty() {
            return Err(Error::EmptyTrainingSet);
        }

        let start = Instant::now();
        let refs: Vec<&[f32]> = samples.iter().map(Vec::as_slice).collect();
        pq_lock.write().train(&refs)?;
        self.trained.store(true, Ordering::Release);

        tracing::info!(
            samples = refs.len(),
            subspaces = self.config.pq.map_or(0, |p| p.subspaces),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "product quantizer trained"
        );

        *buffer = TrainingBuffer::Released;
        drop(buffer);
        drop(graph);

        self.backfill_codes()
    }

    /// Encodes any store rows the code store has not covered yet.
    /// Idempotent; safe to race.
    pub(super) fn backfill_codes(&self) -> Result<()> {
        let (Some(codes), Some(pq_lock)) = (&self.codes, &self.pq) else {
            return Ok(());
        };
        let pq = pq_lock.read();
        let rows = self.store.rows();
        codes.fill_to(self.store.len(), |row| pq.encode(rows.row(row as RowId)))
    }

    /// Phase 1 of an insert: duplicate and capacity checks plus the store
    /// append, serialized by the id-map lock so the capacity check cannot
    /// race.
    fn reserve_row(&self, id: i32, vector: &[f32]) -> Result<RowId> {
        let mut ids = self.id_to_row.write();
        if ids.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        if self.store.len() >= self.config.capacity {
            return Err(Error::CapacityExceeded(self.config.capacity));
        }
        let row = self.store.add(id, vector);
        ids.insert(id, row);
        self.alive.write().insert(row);
        Ok(row)
    }
}

impl VectorIndex for HybridIndex {
    fn add(&self, id: i32, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }

        let row = self.reserve_row(id, vector)?;

        // Buffer a training sample and trigger training at the target.
        if self.pq.is_some() && !self.trained.load(Ordering::Acquire) {
            let target = self.config.pq.map_or(usize::MAX, |p| p.training_sample_target);
            let reached_target = {
                let mut buffer = self.training.lock();
                if let TrainingBuffer::Collecting(samples) = &mut *buffer {
                    samples.push(vector.to_vec());
                    samples.len() >= target
                } else {
                    false
                }
            };
            if reached_target {
                // a concurrent add may have won the training race
                match self.train_from_buffer() {
                    Ok(()) | Err(Error::AlreadyTrained) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        if self.trained.load(Ordering::Acquire) {
            self.backfill_codes()?;
        }

        let level = sample_level(
            &self.level_rng,
            self.config.hnsw.level_mult(),
            self.config.hnsw.max_level,
        );
        let max_expansions = self
            .config
            .hnsw
            .ef_construction
            .saturating_mul(self.config.search.expansions_mult);

        let metric = self.config.metric;
        with_visited(|visited| {
            // Phase 2: gather candidates under the shared lock.
            let plan = {
                let graph = self.graph.read();
                let rows = self.store.rows();
                let mut dist = |r: RowId| metric.distance(vector, rows.row(r));
                let mut pair = |a: RowId, b: RowId| metric.distance(rows.row(a), rows.row(b));
                let mut prefetch = |r: RowId| rows.prefetch(r);
                graph.plan_insert(
                    row,
                    level,
                    max_expansions,
                    visited,
                    &mut dist,
                    &mut pair,
                    &mut prefetch,
                )
            };

            // Phase 3: structural mutation under the exclusive lock.
            let mut graph = self.graph.write();
            let rows = self.store.rows();
            let mut dist = |r: RowId| metric.distance(vector, rows.row(r));
            let mut pair = |a: RowId, b: RowId| metric.distance(rows.row(a), rows.row(b));
            let mut prefetch = |r: RowId| rows.prefetch(r);
            graph.commit_insert(
                plan,
                max_expansions,
                visited,
                &mut dist,
                &mut pair,
                &mut prefetch,
            );
        });

        self.size.fetch_add(1, Ordering::Release);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i32, f32)>> {
        if query.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }

        let n = self.size.load(Ordering::Acquire);
        if n == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let trained = self.trained.load(Ordering::Acquire);
        if trained {
            // cover rows appended since the last encode pass
            self.backfill_codes()?;
        }

        let graph = self.graph.read();
        let Some((entry, entry_level)) = graph.entry_level() else {
            return Ok(Vec::new());
        };

        let rows = self.store.rows();
        let metric = self.config.metric;
        let mut exact = |r: RowId| metric.distance(query, rows.row(r));

        // Upper layers: greedy descent on the exact oracle, the same one
        // the graph was built with.
        let mut current = entry;
        let mut current_dist = exact(current);
        for layer in (1..=entry_level).rev() {
            (current, current_dist) = graph.greedy_descent(layer, current, current_dist, &mut exact);
        }

        let ef = self.config.search.effective_ef(k, n);
        let max_expansions = ef.saturating_mul(self.config.search.expansions_mult);

        let pq_guard = self.pq.as_ref().map(RwLock::read);
        let table = match (&pq_guard, trained) {
            (Some(pq), true) => Some(pq.build_table(query)?),
            _ => None,
        };
        let code_rows = self.codes.as_ref().map(CodeStore::rows);

        // Bottom layer: wide beam on quantized distances when available.
        let mut pool = with_visited(|visited| {
            if let (Some(table), Some(codes), Some(pq)) = (&table, &code_rows, pq_guard.as_ref())
            {
                let mut adc_dist = |r: RowId| pq.distance(table, codes.row(r));
                let seed_dist = adc_dist(current);
                let mut prefetch = |r: RowId| codes.prefetch(r);
                graph.beam_search(
                    0,
                    &[(current, seed_dist)],
                    ef,
                    max_expansions,
                    visited,
                    &mut adc_dist,
                    &mut prefetch,
                )
            } else {
                let mut prefetch = |r: RowId| rows.prefetch(r);
                graph.beam_search(
                    0,
                    &[(current, current_dist)],
                    ef,
                    max_expansions,
                    visited,
                    &mut exact,
                    &mut prefetch,
                )
            }
        });

        pool.truncate(self.config.search.pool_size(k, n));

        let hits = if table.is_some() {
            // Re-rank the head of the pool with exact distances.
            let refine = (k * self.config.search.refine_mult).min(pool.len());
            let mut refined: Vec<(RowId, f32)> = pool[..refine]
                .iter()
                .map(|&(r, _)| (r, exact(r)))
                .collect();
            refined.sort_by(|a, b| a.1.total_cmp(&b.1));
            refined.truncate(k);
            refined
        } else {
            // the beam already ran on exact distances
            pool.truncate(k);
            pool
        };

        Ok(hits
            .into_iter()
            .map(|(r, d)| (self.store.id(r), d))
            .collect())
    }

    fn remove(&self, id: i32) -> bool {
        let row = { self.id_to_row.write().remove(&id) };
        let Some(row) = row else {
            return false;
        };

        {
            let mut graph = self.graph.write();
            graph.remove_node(row);
            if let Some((entry, _)) = graph.entry_level() {
                tracing::debug!(id, new_entry = entry, "removed vector");
            }
        }

        self.alive.write().remove(row);
        self.size.fetch_sub(1, Ordering::Release);
        true
    }

    fn rebuild(&self) {
        let start = Instant::now();
        let mut graph = self.graph.write();

        let mut live: Vec<(i32, RowId)> = self
            .id_to_row
            .read()
            .iter()
            .map(|(&id, &row)| (id, row))
            .collect();
        live.sort_unstable_by_key(|&(id, _)| id);

        graph.clear();

        let rows = self.store.rows();
        let metric = self.config.metric;
        let max_expansions = self
            .config
            .hnsw
            .ef_construction
            .saturating_mul(self.config.search.expansions_mult);

        for &(_, row) in &live {
            let level = sample_level(
                &self.level_rng,
                self.config.hnsw.level_mult(),
                self.config.hnsw.max_level,
            );
            with_visited(|visited| {
                let mut dist = |r: RowId| metric.distance(rows.row(row), rows.row(r));
                let mut pair = |a: RowId, b: RowId| metric.distance(rows.row(a), rows.row(b));
                let mut prefetch = |r: RowId| rows.prefetch(r);
                let plan = graph.plan_insert(
                    row,
                    level,
                    max_expansions,
                    visited,
                    &mut dist,
                    &mut pair,
                    &mut prefetch,
                );
                graph.commit_insert(
                    plan,
                    max_expansions,
                    visited,
                    &mut dist,
                    &mut pair,
                    &mut prefetch,
                );
            });
        }

        tracing::info!(
            vectors = live.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "graph rebuilt"
        );
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }
}

// Persistence needs to reach into the private fields.
impl HybridIndex {
    pub(super) fn store(&self) -> &VectorStore {
        &self.store
    }

    pub(super) fn codes_store(&self) -> Option<&CodeStore> {
        self.codes.as_ref()
    }

    pub(super) fn pq_codec(&self) -> Option<&RwLock<ProductQuantizer>> {
        self.pq.as_ref()
    }

    pub(super) fn graph_state(&self) -> &RwLock<GraphState> {
        &self.graph
    }

    pub(super) fn alive_rows(&self) -> RoaringBitmap {
        self.alive.read().clone()
    }

    pub(super) fn restore_runtime_state(
        &self,
        id_to_row: FxHashMap<i32, RowId>,
        alive: RoaringBitmap,
        trained: bool,
    ) {
        let size = id_to_row.len();
        *self.id_to_row.write() = id_to_row;
        *self.alive.write() = alive;
        self.size.store(size, Ordering::Release);
        if trained {
            self.trained.store(true, Ordering::Release);
            *self.training.lock() = TrainingBuffer::Released;
        }
    }
}
