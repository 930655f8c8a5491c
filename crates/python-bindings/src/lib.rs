use std::collections::{HashMap, HashSet};

use numpy::PyArray2;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use pedigree_kinship_core as core;
use core::kinship::Backend;
use core::pedigree::{ParseOptions, Pedigree};
use core::types::{AdjacencyMap, Kinship, Vertex, VertexSet};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a core library error into a Python ValueError.
fn to_pyerr(e: core::KinshipError) -> PyErr {
    PyValueError::new_err(format!("{}", e))
}

fn parse_backend(name: &str) -> PyResult<Backend> {
    match name {
        "time" | "speed" => Ok(Backend::TimeOptimised),
        "memory" => Ok(Backend::MemoryOptimised),
        other => Err(PyValueError::new_err(format!(
            "unknown backend '{other}'; expected 'time' or 'memory'"
        ))),
    }
}

/// Rebuild an adjacency dict as an insertion-ordered map with sorted keys,
/// so results do not depend on Python dict iteration order.
fn to_adjacency(mut raw: HashMap<Vertex, Vec<Vertex>>) -> AdjacencyMap {
    let mut keys: Vec<Vertex> = raw.keys().copied().collect();
    keys.sort_unstable();
    let mut map = AdjacencyMap::with_capacity(keys.len());
    for key in keys {
        let list = raw.remove(&key).unwrap_or_default();
        map.insert(key, list);
    }
    map
}

// ---------------------------------------------------------------------------
// KinshipMatrix
// ---------------------------------------------------------------------------

/// Sparse symmetric kinship matrix over a set of probands.
#[pyclass(name = "KinshipMatrix")]
struct PyKinshipMatrix {
    inner: Option<core::KinshipMatrix>,
}

impl PyKinshipMatrix {
    fn matrix(&self) -> PyResult<&core::KinshipMatrix> {
        self.inner
            .as_ref()
            .ok_or_else(|| PyValueError::new_err("kinship matrix has been freed"))
    }
}

#[pymethods]
impl PyKinshipMatrix {
    /// Kinship coefficient between two probands.
    ///
    /// Parameters
    /// ----------
    /// first : int
    ///     A proband id.
    /// second : int
    ///     A proband id; may equal `first` for the self-kinship.
    fn get_kinship(&self, first: Vertex, second: Vertex) -> PyResult<Kinship> {
        self.matrix()?.get(first, second).map_err(to_pyerr)
    }

    /// The proband ids covered by this matrix.
    fn sinks(&self) -> PyResult<Vec<Vertex>> {
        Ok(self.matrix()?.iter_sinks().collect())
    }

    /// Number of probands.
    fn __len__(&self) -> PyResult<usize> {
        Ok(self.matrix()?.len())
    }

    /// Peak number of resident rows observed during the traversal.
    fn peak_residents(&self) -> PyResult<usize> {
        Ok(self.matrix()?.peak_residents())
    }

    /// Convert the sparse matrix to a NumPy array and free its memory.
    ///
    /// Returns
    /// -------
    /// tuple
    ///     (vertex_to_index, matrix): a dict mapping proband id to row
    ///     index, and a dense symmetric float32 array. The sparse matrix
    ///     becomes empty; further lookups on this object raise ValueError.
    fn to_numpy_and_free<'py>(
        &mut self,
        py: Python<'py>,
    ) -> PyResult<(HashMap<Vertex, usize>, Bound<'py, PyArray2<Kinship>>)> {
        let matrix = self
            .inner
            .take()
            .ok_or_else(|| PyValueError::new_err("kinship matrix has been freed"))?;
        let (index_map, dense) = matrix.to_dense();
        let n = dense.nrows();

        // nalgebra stores column-major, numpy expects row-major.
        let rows: Vec<Vec<Kinship>> = (0..n)
            .map(|i| (0..n).map(|j| dense[(i, j)]).collect())
            .collect();
        let array = PyArray2::from_vec2(py, &rows).map_err(|e| {
            PyValueError::new_err(format!("Failed to create kinship array: {}", e))
        })?;

        Ok((index_map.into_iter().collect(), array))
    }
}

// ---------------------------------------------------------------------------
// Pedigree
// ---------------------------------------------------------------------------

/// A pedigree of individuals with at most two parents each.
#[pyclass(name = "Pedigree")]
struct PyPedigree {
    inner: Pedigree,
}

#[pymethods]
impl PyPedigree {
    /// Create an empty pedigree.
    #[new]
    fn new() -> Self {
        PyPedigree {
            inner: Pedigree::new(),
        }
    }

    /// Parse a text pedigree file (`child parent1 parent2` per line).
    ///
    /// Parameters
    /// ----------
    /// path : str
    ///     Path to the pedigree file.
    /// separator : str
    ///     Column separator; the first character is used.
    /// missing_parent : list of str or None
    ///     Tokens meaning "parent unknown"; defaults to ["-1", "."].
    /// skip_first_line : bool
    ///     Skip the first line (a header without a leading '#').
    #[staticmethod]
    #[pyo3(signature = (path, separator=" ", missing_parent=None, skip_first_line=false))]
    fn from_file(
        path: &str,
        separator: &str,
        missing_parent: Option<Vec<String>>,
        skip_first_line: bool,
    ) -> PyResult<Self> {
        let mut options = ParseOptions::default();
        if let Some(first) = separator.chars().next() {
            options.separator = first;
        }
        if let Some(missing) = missing_parent {
            options.missing_parent = missing;
        }
        options.skip_first_line = skip_first_line;

        Pedigree::from_file(path, &options)
            .map(|inner| PyPedigree { inner })
            .map_err(to_pyerr)
    }

    /// Parse a CSV pedigree with an `animal,sire,dam` header.
    #[staticmethod]
    fn from_csv(path: &str) -> PyResult<Self> {
        Pedigree::from_csv(path)
            .map(|inner| PyPedigree { inner })
            .map_err(to_pyerr)
    }

    /// Record `parent` as the next parent slot of `child`.
    fn add_parent(&mut self, child: Vertex, parent: Vertex) -> PyResult<()> {
        self.inner.add_parent(child, parent).map_err(to_pyerr)
    }

    /// Number of individuals.
    fn n_individuals(&self) -> usize {
        self.inner.len()
    }

    /// Ids of individuals without recorded parents.
    fn founders(&self) -> Vec<Vertex> {
        self.inner.founders().into_iter().collect()
    }

    /// Ids of individuals without children (the default probands).
    fn sinks(&self) -> Vec<Vertex> {
        self.inner.sinks().into_iter().collect()
    }

    /// Validate the pedigree for consistency.
    fn validate(&self) -> PyResult<()> {
        self.inner.validate().map_err(to_pyerr)
    }

    /// Compute the kinship matrix over all childless individuals.
    ///
    /// Parameters
    /// ----------
    /// backend : str
    ///     "time" (faster) or "memory" (smaller working set).
    #[pyo3(signature = (backend="time"))]
    fn proband_kinship(&self, backend: &str) -> PyResult<PyKinshipMatrix> {
        let backend = parse_backend(backend)?;
        self.inner
            .proband_kinship(backend)
            .map(|matrix| PyKinshipMatrix {
                inner: Some(matrix),
            })
            .map_err(to_pyerr)
    }

    /// Compute the kinship matrix over an explicit proband set.
    #[pyo3(signature = (probands, backend="time"))]
    fn kinship_of(&self, probands: Vec<Vertex>, backend: &str) -> PyResult<PyKinshipMatrix> {
        let backend = parse_backend(backend)?;
        let probands: VertexSet = probands.into_iter().collect();
        self.inner
            .kinship_of(&probands, backend)
            .map(|matrix| PyKinshipMatrix {
                inner: Some(matrix),
            })
            .map_err(to_pyerr)
    }
}

// ---------------------------------------------------------------------------
// Module-level functions
// ---------------------------------------------------------------------------

/// Compute a kinship matrix from raw adjacency dicts.
///
/// Parameters
/// ----------
/// children : dict
///     Mapping of vertex id to the list of its children.
/// parents : dict
///     Mapping of vertex id to the list of its (at most two) parents.
/// sinks : set
///     The proband ids whose kinship rows are retained.
/// backend : str
///     "time" (faster) or "memory" (smaller working set).
///
/// Returns
/// -------
/// KinshipMatrix
#[pyfunction]
#[pyo3(signature = (children, parents, sinks, backend="time"))]
fn calculate_kinship(
    children: HashMap<Vertex, Vec<Vertex>>,
    parents: HashMap<Vertex, Vec<Vertex>>,
    sinks: HashSet<Vertex>,
    backend: &str,
) -> PyResult<PyKinshipMatrix> {
    let backend = parse_backend(backend)?;
    let children = to_adjacency(children);
    let parents = to_adjacency(parents);
    let mut sink_ids: Vec<Vertex> = sinks.into_iter().collect();
    sink_ids.sort_unstable();
    let sinks: VertexSet = sink_ids.into_iter().collect();

    core::kinship::calculate_kinship(&children, &parents, &sinks, backend)
        .map(|matrix| PyKinshipMatrix {
            inner: Some(matrix),
        })
        .map_err(to_pyerr)
}

// ---------------------------------------------------------------------------
// Module definition
// ---------------------------------------------------------------------------

/// Streaming kinship matrices over large pedigrees.
#[pymodule]
fn pedigree_kinship(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_class::<PyPedigree>()?;
    m.add_class::<PyKinshipMatrix>()?;
    m.add_function(wrap_pyfunction!(calculate_kinship, m)?)?;
    Ok(())
}
