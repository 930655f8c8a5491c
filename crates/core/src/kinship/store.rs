use std::collections::BTreeMap;
use std::fmt::Debug;

use ahash::AHashMap;

use crate::error::{KinshipError, Result};
use crate::types::{Kinship, Vertex};

/// Storage backend policy for the sparse symmetric store.
///
/// Both backends satisfy the same contract and produce bitwise-identical
/// kinship values; they trade lookup speed against per-entry memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Open-addressed flat hash maps: fastest lookups, higher peak memory.
    TimeOptimised,
    /// Ordered maps: lower per-entry footprint, slower lookups.
    MemoryOptimised,
}

/// Sparse symmetric kinship store.
///
/// Each unordered pair {i, j} is stored exactly once, in the row keyed by
/// `min(i, j)` under the column `max(i, j)`; the self-kinship of `v` lives
/// at (v, v). Symmetry is implicit and never duplicated, which also means
/// a vertex can only appear as a column in rows with smaller keys.
pub trait KinshipStore: Debug + Send + Sync {
    /// Record the self-kinship of `v`, creating its row.
    fn put_self(&mut self, v: Vertex, value: Kinship);

    /// Record the kinship of the unordered pair {i, j}, `i != j`.
    fn put_pair(&mut self, i: Vertex, j: Vertex, value: Kinship);

    /// Symmetric lookup of φ(i, j); `i == j` yields the self-kinship.
    ///
    /// # Errors
    /// [`KinshipError::NotResident`] when the entry is absent.
    fn get(&self, i: Vertex, j: Vertex) -> Result<Kinship>;

    /// Remove `v`'s row, and the `v` column from every row with a smaller
    /// key (the only rows that can hold it under the triangular rule).
    /// Evicting a non-resident vertex is a no-op.
    fn evict(&mut self, v: Vertex);

    /// Whether `v` currently owns a row.
    fn contains(&self, v: Vertex) -> bool;

    /// Currently resident vertices (row keys).
    fn residents(&self) -> Vec<Vertex>;

    /// Number of resident rows.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored (row, column, value) entry in triangular orientation.
    fn entries(&self) -> Vec<(Vertex, Vertex, Kinship)>;

    /// Drop all rows, leaving the store empty.
    fn clear(&mut self);
}

/// Orient an unordered pair into its (row, column) storage position.
#[inline]
fn triangular(i: Vertex, j: Vertex) -> (Vertex, Vertex) {
    if i <= j {
        (i, j)
    } else {
        (j, i)
    }
}

/// Time-optimised backend: open-addressed hash map rows.
#[derive(Debug, Default)]
pub struct FlatStore {
    rows: AHashMap<Vertex, AHashMap<Vertex, Kinship>>,
}

impl FlatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KinshipStore for FlatStore {
    fn put_self(&mut self, v: Vertex, value: Kinship) {
        self.rows.entry(v).or_default().insert(v, value);
    }

    fn put_pair(&mut self, i: Vertex, j: Vertex, value: Kinship) {
        let (row, column) = triangular(i, j);
        self.rows.entry(row).or_default().insert(column, value);
    }

    fn get(&self, i: Vertex, j: Vertex) -> Result<Kinship> {
        let (row, column) = triangular(i, j);
        let columns = self
            .rows
            .get(&row)
            .ok_or(KinshipError::NotResident(row))?;
        columns
            .get(&column)
            .copied()
            .ok_or(KinshipError::NotResident(column))
    }

    fn evict(&mut self, v: Vertex) {
        if self.rows.remove(&v).is_none() {
            return;
        }
        for (&row, columns) in self.rows.iter_mut() {
            if row < v {
                columns.remove(&v);
            }
        }
    }

    fn contains(&self, v: Vertex) -> bool {
        self.rows.contains_key(&v)
    }

    fn residents(&self) -> Vec<Vertex> {
        self.rows.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn entries(&self) -> Vec<(Vertex, Vertex, Kinship)> {
        self.rows
            .iter()
            .flat_map(|(&row, columns)| {
                columns
                    .iter()
                    .map(move |(&column, &value)| (row, column, value))
            })
            .collect()
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

/// Memory-optimised backend: B-tree rows.
///
/// Ordered rows make eviction a prefix scan over `..v` instead of a pass
/// over every resident row.
#[derive(Debug, Default)]
pub struct CompactStore {
    rows: BTreeMap<Vertex, BTreeMap<Vertex, Kinship>>,
}

impl CompactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KinshipStore for CompactStore {
    fn put_self(&mut self, v: Vertex, value: Kinship) {
        self.rows.entry(v).or_default().insert(v, value);
    }

    fn put_pair(&mut self, i: Vertex, j: Vertex, value: Kinship) {
        let (row, column) = triangular(i, j);
        self.rows.entry(row).or_default().insert(column, value);
    }

    fn get(&self, i: Vertex, j: Vertex) -> Result<Kinship> {
        let (row, column) = triangular(i, j);
        let columns = self
            .rows
            .get(&row)
            .ok_or(KinshipError::NotResident(row))?;
        columns
            .get(&column)
            .copied()
            .ok_or(KinshipError::NotResident(column))
    }

    fn evict(&mut self, v: Vertex) {
        if self.rows.remove(&v).is_none() {
            return;
        }
        for (_, columns) in self.rows.range_mut(..v) {
            columns.remove(&v);
        }
    }

    fn contains(&self, v: Vertex) -> bool {
        self.rows.contains_key(&v)
    }

    fn residents(&self) -> Vec<Vertex> {
        self.rows.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn entries(&self) -> Vec<(Vertex, Vertex, Kinship)> {
        self.rows
            .iter()
            .flat_map(|(&row, columns)| {
                columns
                    .iter()
                    .map(move |(&column, &value)| (row, column, value))
            })
            .collect()
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<Box<dyn KinshipStore>> {
        vec![Box::new(FlatStore::new()), Box::new(CompactStore::new())]
    }

    #[test]
    fn test_pair_stored_under_smaller_key() {
        for mut store in backends() {
            store.put_self(3, 0.5);
            store.put_self(7, 0.5);
            store.put_pair(7, 3, 0.25);

            let entries = store.entries();
            assert!(entries.contains(&(3, 7, 0.25)));
            assert!(!entries.iter().any(|&(row, column, _)| row == 7 && column == 3));
        }
    }

    #[test]
    fn test_get_is_symmetric() {
        for mut store in backends() {
            store.put_self(1, 0.5);
            store.put_self(2, 0.5);
            store.put_pair(1, 2, 0.125);

            assert_eq!(store.get(1, 2).unwrap(), 0.125);
            assert_eq!(store.get(2, 1).unwrap(), 0.125);
            assert_eq!(store.get(1, 1).unwrap(), 0.5);
        }
    }

    #[test]
    fn test_get_missing_vertex_fails() {
        for mut store in backends() {
            store.put_self(1, 0.5);
            assert!(matches!(
                store.get(1, 9),
                Err(KinshipError::NotResident(9))
            ));
            assert!(matches!(
                store.get(9, 1),
                Err(KinshipError::NotResident(9))
            ));
        }
    }

    #[test]
    fn test_evict_removes_row_and_columns() {
        for mut store in backends() {
            store.put_self(1, 0.5);
            store.put_self(2, 0.5);
            store.put_self(3, 0.5);
            store.put_pair(1, 2, 0.1);
            store.put_pair(1, 3, 0.2);
            store.put_pair(2, 3, 0.3);

            store.evict(2);

            assert!(!store.contains(2));
            assert_eq!(store.len(), 2);
            assert!(store.get(1, 2).is_err());
            assert!(store.get(2, 3).is_err());
            // Unrelated entries survive.
            assert_eq!(store.get(1, 3).unwrap(), 0.2);
            assert_eq!(store.get(1, 1).unwrap(), 0.5);

            // No stale column for 2 anywhere.
            assert!(!store
                .entries()
                .iter()
                .any(|&(row, column, _)| row == 2 || column == 2));
        }
    }

    #[test]
    fn test_evict_non_resident_is_noop() {
        for mut store in backends() {
            store.put_self(1, 0.5);
            store.evict(42);
            assert_eq!(store.len(), 1);
            assert_eq!(store.get(1, 1).unwrap(), 0.5);
        }
    }

    #[test]
    fn test_clear_empties_store() {
        for mut store in backends() {
            store.put_self(1, 0.5);
            store.put_self(2, 0.5);
            store.put_pair(1, 2, 0.25);
            store.clear();
            assert!(store.is_empty());
            assert!(store.residents().is_empty());
            assert!(store.entries().is_empty());
        }
    }
}
