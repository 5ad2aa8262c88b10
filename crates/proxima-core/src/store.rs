//! Append-only contiguous vector storage.
//!
//! All rows live in a single row-major `Vec<f32>` pre-allocated to the
//! index capacity, so rows are never relocated while the store is alive.
//! Each row carries its external identifier and a cached squared norm used
//! by the batched distance kernel.
//!
//! # Memory Layout
//!
//! ```text
//! Buffer: [v0_d0, v0_d1, ..., v0_dn, v1_d0, v1_d1, ..., v1_dn, ...]
//! Index:  |<---- row 0 ------->|    |<---- row 1 ------->|
//! ```

use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::simd;

/// Append-only vector store with O(1) by-row access.
///
/// A row's content and identifier are immutable once assigned. The row
/// count is published with release semantics, so a reader that observes
/// row `i` also observes its contents.
#[derive(Debug)]
pub struct VectorStore {
    /// Contiguous row-major buffer holding all vectors.
    buffer: RwLock<Vec<f32>>,
    /// External identifier per row.
    ids: RwLock<Vec<i32>>,
    /// Cached squared norm per row.
    norms: RwLock<Vec<f32>>,
    /// Vector dimension.
    dimension: usize,
    /// Maximum number of rows; fixes the buffer allocation.
    capacity: usize,
    /// Published row count.
    count: AtomicUsize,
}

impl VectorStore {
    /// Creates a store for up to `capacity` rows of `dimension` floats.
    #[must_use]
    pub fn new(dimension: usize, capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(Vec::with_capacity(dimension * capacity)),
            ids: RwLock::new(Vec::with_capacity(capacity)),
            norms: RwLock::new(Vec::with_capacity(capacity)),
            dimension,
            capacity,
            count: AtomicUsize::new(0),
        }
    }

    /// Returns the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the row capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of rows appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns true if no rows have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a vector and returns its row index.
    ///
    /// The caller enforces capacity; the store asserts it as a contract.
    ///
    /// # Panics
    ///
    /// Panics if the dimension does not match or the store is full.
    pub fn add(&self, id: i32, vector: &[f32]) -> u32 {
        assert_eq!(
            vector.len(),
            self.dimension,
            "Vector dimension mismatch: expected {}, got {}",
            self.dimension,
            vector.len()
        );

        let mut buffer = self.buffer.write();
        let row = buffer.len() / self.dimension;
        assert!(row < self.capacity, "vector store capacity exceeded");

        buffer.extend_from_slice(vector);
        self.ids.write().push(id);
        self.norms.write().push(simd::norm_sq_fast(vector));
        drop(buffer);

        self.count.store(row + 1, Ordering::Release);
        row as u32
    }

    /// Returns the external identifier of a row.
    #[must_use]
    pub fn id(&self, row: u32) -> i32 {
        self.ids.read()[row as usize]
    }

    /// Returns the cached squared norm of a row.
    #[must_use]
    pub fn norm_sq(&self, row: u32) -> f32 {
        self.norms.read()[row as usize]
    }

    /// Returns a copy of a row, or `None` if the row does not exist.
    #[must_use]
    pub fn get(&self, row: u32) -> Option<Vec<f32>> {
        let buffer = self.buffer.read();
        let offset = row as usize * self.dimension;
        if offset + self.dimension <= buffer.len() {
            Some(buffer[offset..offset + self.dimension].to_vec())
        } else {
            None
        }
    }

    /// Acquires a read guard over the whole buffer for repeated row access.
    ///
    /// Taking the lock once per search instead of once per row matters in
    /// the beam loop.
    #[must_use]
    pub fn rows(&self) -> RowsGuard<'_> {
        RowsGuard {
            guard: self.buffer.read(),
            dimension: self.dimension,
        }
    }

    /// Copies out the id table and raw buffer, for serialization.
    pub(crate) fn snapshot(&self) -> (Vec<i32>, Vec<f32>) {
        (self.ids.read().clone(), self.buffer.read().clone())
    }

    /// Restores rows from a snapshot. Norms are derived state and are
    /// recomputed rather than deserialized.
    pub(crate) fn restore(&self, ids: Vec<i32>, buffer: Vec<f32>) {
        debug_assert_eq!(ids.len() * self.dimension, buffer.len());

        let norms = (0..ids.len())
            .map(|row| simd::norm_sq_fast(&buffer[row * self.dimension..(row + 1) * self.dimension]))
            .collect();

        let count = ids.len();
        let mut buf = self.buffer.write();
        buf.clear();
        buf.extend_from_slice(&buffer);
        *self.ids.write() = ids;
        *self.norms.write() = norms;
        drop(buf);
        self.count.store(count, Ordering::Release);
    }

    /// Prefetches a row into CPU cache ahead of use. Hint only.
    #[inline]
    pub fn prefetch(&self, row: u32) {
        let buffer = self.buffer.read();
        let offset = row as usize * self.dimension;
        if offset + self.dimension <= buffer.len() {
            simd::prefetch_floats(&buffer[offset..offset + self.dimension]);
        }
    }
}

/// Read guard exposing borrowed row slices.
pub struct RowsGuard<'a> {
    guard: RwLockReadGuard<'a, Vec<f32>>,
    dimension: usize,
}

impl RowsGuard<'_> {
    /// Returns the row as a borrowed slice.
    ///
    /// # Panics
    ///
    /// Panics if the row is out of bounds.
    #[inline]
    #[must_use]
    pub fn row(&self, row: u32) -> &[f32] {
        let offset = row as usize * self.dimension;
        &self.guard[offset..offset + self.dimension]
    }

    /// Prefetches a row through the held guard.
    #[inline]
    pub fn prefetch(&self, row: u32) {
        let offset = row as usize * self.dimension;
        if offset + self.dimension <= self.guard.len() {
            simd::prefetch_floats(&self.guard[offset..offset + self.dimension]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_read_back() {
        let store = VectorStore::new(4, 16);
        let r0 = store.add(10, &[1.0, 2.0, 3.0, 4.0]);
        let r1 = store.add(-3, &[0.5, 0.5, 0.5, 0.5]);

        assert_eq!(r0, 0);
        assert_eq!(r1, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.id(0), 10);
        assert_eq!(store.id(1), -3);
        assert_eq!(store.get(0).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(store.get(5).is_none());
    }

    #[test]
    fn test_norms_are_cached() {
        let store = VectorStore::new(3, 4);
        store.add(1, &[3.0, 4.0, 0.0]);
        assert!((store.norm_sq(0) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_rows_guard_borrows() {
        let store = VectorStore::new(2, 8);
        store.add(1, &[1.0, 2.0]);
        store.add(2, &[3.0, 4.0]);

        let rows = store.rows();
        assert_eq!(rows.row(0), &[1.0, 2.0]);
        assert_eq!(rows.row(1), &[3.0, 4.0]);
    }

    #[test]
    #[should_panic(expected = "dimension mismatch")]
    fn test_dimension_contract() {
        let store = VectorStore::new(4, 4);
        store.add(1, &[1.0, 2.0]);
    }

    #[test]
    fn test_buffer_never_reallocates() {
        let store = VectorStore::new(8, 100);
        let before = store.buffer.read().as_ptr();
        for i in 0..100 {
            store.add(i, &[i as f32; 8]);
        }
        let after = store.buffer.read().as_ptr();
        assert_eq!(before, after, "rows must not relocate");
    }
}
