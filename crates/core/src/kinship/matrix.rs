use indexmap::IndexMap;
use sprs::TriMat;

use crate::error::{KinshipError, Result};
use crate::kinship::store::KinshipStore;
use crate::types::{DenseKinshipMatrix, Kinship, SparseKinshipMatrix, Vertex, VertexSet};

/// Closed kinship matrix over a set of probands.
///
/// Produced by [`calculate_kinship`](crate::kinship::calculate_kinship);
/// holds the sparse symmetric store left over after the traversal, which
/// at that point contains exactly one row per proband.
#[derive(Debug)]
pub struct KinshipMatrix {
    store: Box<dyn KinshipStore>,
    sinks: VertexSet,
    peak_residents: usize,
}

impl KinshipMatrix {
    pub(crate) fn new(
        store: Box<dyn KinshipStore>,
        sinks: VertexSet,
        peak_residents: usize,
    ) -> Self {
        Self {
            store,
            sinks,
            peak_residents,
        }
    }

    /// Kinship coefficient φ(i, j); symmetric in its arguments, and
    /// `get(v, v)` is the self-kinship.
    ///
    /// # Errors
    /// [`KinshipError::NotASink`] when either vertex is not a proband.
    pub fn get(&self, i: Vertex, j: Vertex) -> Result<Kinship> {
        if !self.sinks.contains(&i) {
            return Err(KinshipError::NotASink(i));
        }
        if !self.sinks.contains(&j) {
            return Err(KinshipError::NotASink(j));
        }
        self.store.get(i, j)
    }

    /// The probands for which kinship is available.
    pub fn iter_sinks(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.sinks.iter().copied()
    }

    /// Number of probands.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Peak number of resident rows observed while this matrix was being
    /// computed (the measured cut size of the traversal).
    pub fn peak_residents(&self) -> usize {
        self.peak_residents
    }

    /// Convert to a dense symmetric matrix with both orientations filled,
    /// together with the mapping from vertex id to contiguous row index
    /// (ascending id order). Consumes the sparse store to free its memory.
    pub fn to_dense(mut self) -> (IndexMap<Vertex, usize>, DenseKinshipMatrix) {
        let index_map = self.index_map();
        let n = index_map.len();
        let mut dense = DenseKinshipMatrix::zeros(n, n);
        for (row, column, value) in self.store.entries() {
            let i = index_map[&row];
            let j = index_map[&column];
            dense[(i, j)] = value;
            dense[(j, i)] = value;
        }
        self.store.clear();
        (index_map, dense)
    }

    /// Convert to a symmetric CSC matrix with both orientations filled,
    /// together with the vertex-to-row-index mapping (ascending id order).
    /// Consumes the sparse store to free its memory.
    pub fn to_csc(mut self) -> (IndexMap<Vertex, usize>, SparseKinshipMatrix) {
        let index_map = self.index_map();
        let n = index_map.len();
        let mut triplets = TriMat::new((n, n));
        for (row, column, value) in self.store.entries() {
            let i = index_map[&row];
            let j = index_map[&column];
            triplets.add_triplet(i, j, value);
            if i != j {
                triplets.add_triplet(j, i, value);
            }
        }
        self.store.clear();
        (index_map, triplets.to_csc())
    }

    fn index_map(&self) -> IndexMap<Vertex, usize> {
        let mut vertices = self.store.residents();
        vertices.sort_unstable();
        vertices
            .into_iter()
            .enumerate()
            .map(|(index, v)| (v, index))
            .collect()
    }
}
