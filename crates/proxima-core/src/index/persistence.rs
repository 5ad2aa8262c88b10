//! Snapshot persistence for the hybrid index.
//!
//! The on-disk format is a single bincode blob: a magic tag and version,
//! the full configuration, the raw vector rows and identifiers, the code
//! rows and codebooks when the quantizer is trained, and the graph
//! topology. Loading validates the tag, the version, and the embedded
//! configuration before reconstructing anything, so a snapshot with a
//! mismatched dimension or subspace count is rejected instead of
//! producing a silently broken index.
//!
//! Durability of the storage medium is the caller's responsibility; this
//! is a state export, not a write-ahead log.

use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::hnsw::graph::{GraphNode, GraphState, RowId};
use super::hybrid::HybridIndex;
use crate::config::IndexConfig;
use crate::error::{Error, Result};

const MAGIC: [u8; 8] = *b"PROXIDX\0";
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    magic: [u8; 8],
    version: u32,
    config: IndexConfig,
    /// External identifier per store row, including removed rows.
    ids: Vec<i32>,
    /// Row-major vector buffer. Norms are derived and not serialized.
    vectors: Vec<f32>,
    /// Rows that are live (not removed).
    alive: RoaringBitmap,
    trained: bool,
    codebooks: Option<Vec<f32>>,
    codes: Vec<u8>,
    nodes: Vec<Option<GraphNode>>,
    entry: Option<RowId>,
}

impl HybridIndex {
    /// Writes a self-describing snapshot of the index to `path`.
    ///
    /// The snapshot is consistent: it is taken under the graph's shared
    /// lock, so no insert is mid-mutation while state is captured.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] on file errors, [`Error::Serialization`] if encoding
    /// fails.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let graph = self.graph_state().read();
        let (ids, vectors) = self.store().snapshot();

        let trained = self.is_pq_trained();
        let codebooks = match (self.pq_codec(), trained) {
            (Some(pq), true) => Some(pq.read().codebooks().to_vec()),
            _ => None,
        };
        let codes = self
            .codes_store()
            .map_or_else(Vec::new, |c| c.rows().raw().to_vec());

        let snapshot = Snapshot {
            magic: MAGIC,
            version: VERSION,
            config: self.config().clone(),
            ids,
            vectors,
            alive: self.alive_rows(),
            trained,
            codebooks,
            codes,
            nodes: graph.nodes.clone(),
            entry: graph.entry,
        };
        drop(graph);

        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), &snapshot)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Loads an index from a snapshot written by [`HybridIndex::save_to`].
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] when the file is not a snapshot, carries
    /// an unsupported version, or its sections disagree with the embedded
    /// configuration; [`Error::Corrupted`] when the restored graph fails
    /// its invariant check; [`Error::Io`] on file errors.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let snapshot: Snapshot = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| Error::Serialization(e.to_string()))?;

        if snapshot.magic != MAGIC {
            return Err(Error::Serialization(
                "not a proxima index snapshot".to_string(),
            ));
        }
        if snapshot.version != VERSION {
            return Err(Error::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        snapshot.config.validate()?;
        validate_sections(&snapshot)?;

        let config = snapshot.config.clone();
        let index = Self::new(config.clone())?;

        index.store().restore(snapshot.ids.clone(), snapshot.vectors);

        if let (Some(codebooks), Some(pq)) = (snapshot.codebooks, index.pq_codec()) {
            pq.write().restore(codebooks);
        }
        if let Some(codes) = index.codes_store() {
            codes.restore(snapshot.codes);
        }

        *index.graph_state().write() =
            GraphState::from_parts(&config.hnsw, snapshot.nodes, snapshot.entry);

        let mut id_to_row = FxHashMap::default();
        for row in &snapshot.alive {
            id_to_row.insert(snapshot.ids[row as usize], row);
        }
        index.restore_runtime_state(id_to_row, snapshot.alive, snapshot.trained);

        // a snapshot taken while an encode pass was lagging is caught up here
        if snapshot.trained {
            index.backfill_codes()?;
        }

        index.check_invariants()?;
        Ok(index)
    }
}

/// Cross-checks the snapshot sections against its embedded configuration.
fn validate_sections(snapshot: &Snapshot) -> Result<()> {
    let config = &snapshot.config;
    let rows = snapshot.ids.len();

    if rows > config.capacity {
        return Err(Error::Serialization(format!(
            "snapshot holds {rows} rows but capacity is {}",
            config.capacity
        )));
    }
    if snapshot.vectors.len() != rows * config.dimension {
        return Err(Error::Serialization(
            "vector buffer does not match row count and dimension".to_string(),
        ));
    }
    if snapshot.nodes.len() > rows {
        return Err(Error::Serialization(
            "graph topology references rows beyond the store".to_string(),
        ));
    }

    match (&config.pq, snapshot.trained) {
        (None, true) => {
            return Err(Error::Serialization(
                "snapshot claims a trained quantizer but PQ is disabled".to_string(),
            ));
        }
        (Some(pq), true) => {
            let sub_dim = config.dimension / pq.subspaces;
            let expected = pq.subspaces * pq.centroids_per_sub() * sub_dim;
            if snapshot.codebooks.as_ref().map_or(0, Vec::len) != expected {
                return Err(Error::Serialization(format!(
                    "codebook table must hold {expected} floats for {} subspaces",
                    pq.subspaces
                )));
            }
            if snapshot.codes.len() % pq.subspaces != 0 {
                return Err(Error::Serialization(
                    "code rows do not match the subspace count".to_string(),
                ));
            }
        }
        _ => {
            if snapshot.codebooks.is_some() || !snapshot.codes.is_empty() {
                return Err(Error::Serialization(
                    "untrained snapshot carries quantizer state".to_string(),
                ));
            }
        }
    }

    Ok(())
}
