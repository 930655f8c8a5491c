/// Vertex identifier of an individual in a pedigree.
///
/// Ordering between identifiers decides which side of the triangular
/// storage rule an entry lands on; it carries no other meaning.
pub type Vertex = u64;

/// Kinship coefficient scalar.
///
/// Stored as `f32`: the resident cut can hold millions of entries and the
/// coefficient is a sum of dyadic fractions, so single precision is enough.
pub type Kinship = f32;

/// Adjacency mapping from a vertex to its parent or child list.
///
/// Insertion-ordered so that traversals over the same input visit vertices
/// in the same order on every run.
pub type AdjacencyMap = indexmap::IndexMap<Vertex, Vec<Vertex>>;

/// Insertion-ordered set of vertices.
pub type VertexSet = indexmap::IndexSet<Vertex>;

/// Dense kinship matrix (column-major).
pub type DenseKinshipMatrix = nalgebra::DMatrix<Kinship>;

/// Sparse kinship matrix (CSC format).
pub type SparseKinshipMatrix = sprs::CsMat<Kinship>;
