//! Hierarchical navigable small world graph structure.
//!
//! Implements the multi-layer proximity graph of Malkov & Yashunin
//! (arXiv:1603.09320): an exponentially sampled level per node, greedy
//! descent through the sparse upper layers, and a bounded-width
//! best-first search at the bottom layer.
//!
//! The graph stores topology only. Distances arrive through closures so
//! the coordinator can swap the oracle (exact rows or quantized codes)
//! without this module knowing; the closures are generic parameters, not
//! trait objects, so the distance computation inlines into the traversal
//! loops.
//!
//! Insertion is split into [`GraphState::plan_insert`] (read-only
//! candidate gathering, runs under the shared lock) and
//! [`GraphState::commit_insert`] (structural mutation, runs under the
//! exclusive lock).

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ordered_float::OrderedFloat;
use super::visited::VisitedSet;
use crate::config::HnswParams;

/// Internal row index addressing both the vector store and the graph.
pub(crate) type RowId = u32;

/// Candidate working-set multiplier for the selection heuristic.
const SELECT_POOL_MULT: usize = 6;

/// Per-node topology: top level and one adjacency list per layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GraphNode {
    /// Highest layer this node exists on.
    pub level: usize,
    /// Adjacency lists for layers `0..=level`, holding row indices.
    pub links: Vec<Vec<RowId>>,
}

impl GraphNode {
    fn new(level: usize) -> Self {
        Self {
            level,
            links: vec![Vec::new(); level + 1],
        }
    }
}

/// Gathered insertion work: the neighbors selected per layer, high to low.
pub(crate) struct InsertPlan {
    pub row: RowId,
    pub level: usize,
    /// True when the plan was made against an empty graph.
    pub planned_when_empty: bool,
    /// `(layer, selected neighbor rows)`, highest layer first.
    pub layers: Vec<(usize, Vec<RowId>)>,
}

/// Multi-layer adjacency, entry point, and the traversal algorithms.
///
/// Row slots are `None` for rows whose node was removed (or, transiently,
/// for rows appended to the store but not yet linked).
#[derive(Debug)]
pub(crate) struct GraphState {
    /// Node topology indexed by row.
    pub(crate) nodes: Vec<Option<GraphNode>>,
    /// Anchor for every top-down traversal.
    pub(crate) entry: Option<RowId>,
    max_connections: usize,
    max_connections_0: usize,
    ef_construction: usize,
}

impl GraphState {
    pub(crate) fn new(params: &HnswParams) -> Self {
        Self::from_parts(params, Vec::new(), None)
    }

    /// Reassembles a graph from serialized topology.
    pub(crate) fn from_parts(
        params: &HnswParams,
        nodes: Vec<Option<GraphNode>>,
        entry: Option<RowId>,
    ) -> Self {
        Self {
            nodes,
            entry,
            max_connections: params.max_connections,
            max_connections_0: params.max_connections * 2,
            ef_construction: params.ef_construction,
        }
    }

    /// Degree cap for a layer: 2M at the bottom, M above.
    #[inline]
    pub(crate) fn cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.max_connections_0
        } else {
            self.max_connections
        }
    }

    #[inline]
    pub(crate) fn node(&self, row: RowId) -> Option<&GraphNode> {
        self.nodes.get(row as usize).and_then(Option::as_ref)
    }

    /// Level of the entry point, if the graph is non-empty.
    pub(crate) fn entry_level(&self) -> Option<(RowId, usize)> {
        let entry = self.entry?;
        self.node(entry).map(|n| (entry, n.level))
    }

    #[inline]
    fn neighbors(&self, row: RowId, layer: usize) -> &[RowId] {
        self.node(row)
            .and_then(|n| n.links.get(layer))
            .map_or(&[], Vec::as_slice)
    }

    /// Greedy descent at one layer: hill-climb to a local minimum of the
    /// distance oracle.
    pub(crate) fn greedy_descent<F>(
        &self,
        layer: usize,
        start: RowId,
        start_dist: f32,
        dist: &mut F,
    ) -> (RowId, f32)
    where
        F: FnMut(RowId) -> f32,
    {
        let mut best = start;
        let mut best_dist = start_dist;

        loop {
            let mut improved = false;
            for &neighbor in self.neighbors(best, layer) {
                let d = dist(neighbor);
                if d < best_dist {
                    best = neighbor;
                    best_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return (best, best_dist);
            }
        }
    }

    /// Bounded-width best-first search at one layer.
    ///
    /// Returns up to `ef` rows sorted by ascending distance. The search
    /// stops once the nearest open candidate cannot improve the result
    /// set, or after `max_expansions` candidate expansions, which bounds
    /// latency on pathological graphs.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn beam_search<F, P>(
        &self,
        layer: usize,
        seeds: &[(RowId, f32)],
        ef: usize,
        max_expansions: usize,
        visited: &mut VisitedSet,
        dist: &mut F,
        prefetch: &mut P,
    ) -> Vec<(RowId, f32)>
    where
        F: FnMut(RowId) -> f32,
        P: FnMut(RowId),
    {
        visited.begin(self.nodes.len());

        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, RowId)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, RowId)> = BinaryHeap::new();

        for &(row, d) in seeds {
            if visited.insert(row) {
                candidates.push(Reverse((OrderedFloat(d), row)));
                results.push((OrderedFloat(d), row));
            }
        }

        let mut expansions = 0usize;
        while let Some(Reverse((OrderedFloat(c_dist), c_row))) = candidates.pop() {
            let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if c_dist > furthest && results.len() >= ef {
                break;
            }
            if expansions >= max_expansions {
                break;
            }
            expansions += 1;

            let neighbors = self.neighbors(c_row, layer);
            for &neighbor in neighbors {
                prefetch(neighbor);
            }

            for &neighbor in neighbors {
                if visited.insert(neighbor) {
                    let d = dist(neighbor);
                    let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);

                    if d < furthest || results.len() < ef {
                        candidates.push(Reverse((OrderedFloat(d), neighbor)));
                        results.push((OrderedFloat(d), neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<(RowId, f32)> = results.into_iter().map(|(d, r)| (r, d.0)).collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        out
    }

    /// Diversity-scored neighbor selection.
    ///
    /// From the closest `target * 6` candidates, greedily picks the one
    /// maximizing `1/(1+d_to_v) + 0.3 * min(diversity, 10)/10`, where
    /// `diversity` is the candidate's minimum distance to anything already
    /// selected. Proximity dominates, but a spread-out neighborhood beats
    /// a clump of near-duplicates.
    ///
    /// `candidates` must be sorted by ascending distance to the insertee.
    pub(crate) fn select_neighbors<F2>(
        &self,
        candidates: &[(RowId, f32)],
        target: usize,
        pair: &mut F2,
    ) -> Vec<RowId>
    where
        F2: FnMut(RowId, RowId) -> f32,
    {
        if candidates.len() <= target {
            return candidates.iter().map(|&(row, _)| row).collect();
        }

        let working = &candidates[..candidates.len().min(target * SELECT_POOL_MULT)];
        let mut min_div = vec![f32::INFINITY; working.len()];
        let mut taken = vec![false; working.len()];
        let mut selected = Vec::with_capacity(target);

        while selected.len() < target {
            let mut best: Option<(usize, f32)> = None;
            for (i, &(_, d_to_v)) in working.iter().enumerate() {
                if taken[i] {
                    continue;
                }
                let score = 1.0 / (1.0 + d_to_v) + 0.3 * min_div[i].min(10.0) / 10.0;
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((i, score));
                }
            }
            let Some((picked, _)) = best else {
                break;
            };

            taken[picked] = true;
            selected.push(working[picked].0);

            for (i, slot) in min_div.iter_mut().enumerate() {
                if !taken[i] {
                    let d = pair(working[i].0, working[picked].0);
                    if d < *slot {
                        *slot = d;
                    }
                }
            }
        }

        selected
    }

    /// Read-only phase of an insert: descend to the node's level, then
    /// beam-search each layer downwards, selecting up to `cap(layer)`
    /// neighbors per layer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn plan_insert<F, F2, P>(
        &self,
        row: RowId,
        level: usize,
        max_expansions: usize,
        visited: &mut VisitedSet,
        dist: &mut F,
        pair: &mut F2,
        prefetch: &mut P,
    ) -> InsertPlan
    where
        F: FnMut(RowId) -> f32,
        F2: FnMut(RowId, RowId) -> f32,
        P: FnMut(RowId),
    {
        let mut plan = InsertPlan {
            row,
            level,
            planned_when_empty: true,
            layers: Vec::new(),
        };

        let Some((entry, entry_level)) = self.entry_level() else {
            return plan;
        };
        plan.planned_when_empty = false;

        let mut current = entry;
        let mut current_dist = dist(entry);

        for layer in (level + 1..=entry_level).rev() {
            (current, current_dist) = self.greedy_descent(layer, current, current_dist, dist);
        }

        for layer in (0..=level.min(entry_level)).rev() {
            let candidates = self.beam_search(
                layer,
                &[(current, current_dist)],
                self.ef_construction,
                max_expansions,
                visited,
                dist,
                prefetch,
            );

            let selected = self.select_neighbors(&candidates, self.cap(layer), pair);
            plan.layers.push((layer, selected));

            if let Some(&(best, best_dist)) = candidates.first() {
                current = best;
                current_dist = best_dist;
            }
        }

        plan
    }

    /// Write phase of an insert: materialize the node, link it to the
    /// planned neighbors in both directions, prune overfull neighbors,
    /// and publish the entry point if the new node tops the hierarchy.
    ///
    /// If the plan was made against an empty graph but another insert won
    /// that race, the gathering is redone here under the exclusive lock.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn commit_insert<F, F2, P>(
        &mut self,
        plan: InsertPlan,
        max_expansions: usize,
        visited: &mut VisitedSet,
        dist: &mut F,
        pair: &mut F2,
        prefetch: &mut P,
    ) where
        F: FnMut(RowId) -> f32,
        F2: FnMut(RowId, RowId) -> f32,
        P: FnMut(RowId),
    {
        let plan = if plan.planned_when_empty && self.entry.is_some() {
            self.plan_insert(
                plan.row,
                plan.level,
                max_expansions,
                visited,
                dist,
                pair,
                prefetch,
            )
        } else {
            plan
        };

        let row = plan.row;
        if self.nodes.len() <= row as usize {
            self.nodes.resize_with(row as usize + 1, || None);
        }
        self.nodes[row as usize] = Some(GraphNode::new(plan.level));

        if self.entry.is_none() {
            self.entry = Some(row);
            return;
        }

        for (layer, selected) in &plan.layers {
            for &neighbor in selected {
                self.link(row, neighbor, *layer, pair);
            }
        }

        if let Some((_, entry_level)) = self.entry_level() {
            if plan.level > entry_level {
                self.entry = Some(row);
            }
        }
    }

    /// Adds the edge (a, b) at `layer` in both directions, then prunes
    /// either endpoint that exceeds the layer cap.
    fn link<F2>(&mut self, a: RowId, b: RowId, layer: usize, pair: &mut F2)
    where
        F2: FnMut(RowId, RowId) -> f32,
    {
        if a == b {
            return;
        }
        // a planned neighbor may have been removed between plan and commit
        if self.node(b).map_or(true, |n| n.links.len() <= layer) {
            return;
        }

        let added = {
            let links_a = &mut self.nodes[a as usize].as_mut().unwrap().links[layer];
            if links_a.contains(&b) {
                false
            } else {
                links_a.push(b);
                true
            }
        };
        if !added {
            return;
        }
        self.nodes[b as usize].as_mut().unwrap().links[layer].push(a);

        let cap = self.cap(layer);
        for endpoint in [a, b] {
            if self.neighbors(endpoint, layer).len() > cap {
                self.prune(endpoint, layer, cap, pair);
            }
        }
    }

    /// Recomputes distances from `row` to all of its layer connections,
    /// keeps the closest `cap`, and removes the reverse edge of every
    /// dropped connection so adjacency stays symmetric.
    fn prune<F2>(&mut self, row: RowId, layer: usize, cap: usize, pair: &mut F2)
    where
        F2: FnMut(RowId, RowId) -> f32,
    {
        let connections = self.neighbors(row, layer).to_vec();
        let mut with_dist: Vec<(RowId, f32)> = connections
            .iter()
            .map(|&c| (c, pair(row, c)))
            .collect();
        with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));

        let kept: Vec<RowId> = with_dist.iter().take(cap).map(|&(c, _)| c).collect();

        for &(dropped, _) in with_dist.iter().skip(cap) {
            if let Some(node) = self.nodes[dropped as usize].as_mut() {
                if let Some(links) = node.links.get_mut(layer) {
                    links.retain(|&c| c != row);
                }
            }
        }

        self.nodes[row as usize].as_mut().unwrap().links[layer] = kept;
    }

    /// Logically removes a node: purges it from every neighbor's
    /// adjacency, drops its topology, and re-anchors the entry point on
    /// the highest-level survivor.
    pub(crate) fn remove_node(&mut self, row: RowId) {
        let Some(node) = self.nodes.get_mut(row as usize).and_then(Option::take) else {
            return;
        };

        for (layer, links) in node.links.iter().enumerate() {
            for &neighbor in links {
                if let Some(n) = self.nodes[neighbor as usize].as_mut() {
                    if let Some(nl) = n.links.get_mut(layer) {
                        nl.retain(|&c| c != row);
                    }
                }
            }
        }

        if self.entry == Some(row) {
            self.entry = self
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.as_ref().map(|n| (i as RowId, n.level)))
                .max_by_key(|&(_, level)| level)
                .map(|(i, _)| i);
        }
    }

    /// Drops all topology while keeping row addressing intact. Used by
    /// rebuild before re-inserting every live row.
    pub(crate) fn clear(&mut self) {
        for slot in &mut self.nodes {
            *slot = None;
        }
        self.entry = None;
    }

    /// Structural invariant check: bidirectional edges, degree caps,
    /// no self-loops or duplicates, entry-point level dominance.
    pub(crate) fn check_invariants(&self) -> std::result::Result<(), String> {
        let live = self.nodes.iter().flatten().count();
        match (self.entry, live) {
            (None, 0) => return Ok(()),
            (None, _) => return Err("non-empty graph without entry point".to_string()),
            (Some(_), 0) => return Err("entry point on empty graph".to_string()),
            (Some(entry), _) if self.node(entry).is_none() => {
                return Err(format!("entry point {entry} is not a live node"));
            }
            _ => {}
        }

        let entry_level = self.entry_level().map_or(0, |(_, l)| l);

        for (i, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            let row = i as RowId;

            if node.level > entry_level {
                return Err(format!(
                    "node {row} level {} exceeds entry level {entry_level}",
                    node.level
                ));
            }
            if node.links.len() != node.level + 1 {
                return Err(format!("node {row} has malformed layer list"));
            }

            for (layer, links) in node.links.iter().enumerate() {
                if links.len() > self.cap(layer) {
                    return Err(format!(
                        "node {row} layer {layer} degree {} exceeds cap {}",
                        links.len(),
                        self.cap(layer)
                    ));
                }
                for &neighbor in links {
                    if neighbor == row {
                        return Err(format!("node {row} layer {layer} has a self-loop"));
                    }
                    if links.iter().filter(|&&c| c == neighbor).count() > 1 {
                        return Err(format!(
                            "node {row} layer {layer} lists {neighbor} twice"
                        ));
                    }
                    let Some(other) = self.node(neighbor) else {
                        return Err(format!(
                            "node {row} layer {layer} links dead row {neighbor}"
                        ));
                    };
                    if !other.links.get(layer).is_some_and(|l| l.contains(&row)) {
                        return Err(format!(
                            "edge {row}->{neighbor} at layer {layer} is not reciprocated"
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Draws a node level from the truncated exponential distribution
/// ⌊−ln(u) · level_mult⌋, advancing the shared xorshift64 state.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn sample_level(state: &AtomicU64, level_mult: f64, max_level: usize) -> usize {
    let mut s = state.load(Ordering::Relaxed);
    s ^= s << 13;
    s ^= s >> 7;
    s ^= s << 17;
    state.store(s, Ordering::Relaxed);

    #[allow(clippy::cast_precision_loss)]
    let uniform = (((s >> 11) as f64) / (1u64 << 53) as f64).max(f64::MIN_POSITIVE);
    ((-uniform.ln() * level_mult).floor() as usize).min(max_level)
}
