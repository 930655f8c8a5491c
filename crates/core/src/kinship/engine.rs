use ahash::{AHashMap, AHashSet};

use crate::error::{KinshipError, Result};
use crate::kinship::matrix::KinshipMatrix;
use crate::kinship::progress::{NoopReporter, Progress, ProgressReporter};
use crate::kinship::scheduler::CutScheduler;
use crate::kinship::store::{Backend, CompactStore, FlatStore, KinshipStore};
use crate::types::{AdjacencyMap, Kinship, Vertex, VertexSet};

/// Compute the kinship matrix over `sinks` with a bounded-memory traversal
/// of the pedigree.
///
/// The pedigree is supplied as two adjacency mappings: `parents[v]` lists
/// the (at most two) parents of `v` and `children[p]` lists the children
/// of `p`; the two maps must mirror each other and share the same key set.
/// `sinks` are the probands whose rows are never evicted; every other
/// vertex is dropped from the store as soon as its last child has been
/// processed, so the working set stays close to the width of the pedigree
/// rather than its size.
///
/// A vertex with no recorded parents is a founder with self-kinship ½; a
/// vertex whose two parent slots name the same individual is treated as
/// the product of selfing.
///
/// # Errors
///
/// [`KinshipError::PedigreeInconsistency`] when the two maps disagree, a
/// parent reference points outside the pedigree, a vertex has more than
/// two parents, or a reference counter underflows.
/// [`KinshipError::UnknownVertex`] when the recurrence needs a kinship
/// entry that is not resident (a traversal-ordering bug, not an input
/// error).
pub fn calculate_kinship(
    children: &AdjacencyMap,
    parents: &AdjacencyMap,
    sinks: &VertexSet,
    backend: Backend,
) -> Result<KinshipMatrix> {
    calculate_kinship_with_reporter(children, parents, sinks, backend, &mut NoopReporter)
}

/// Like [`calculate_kinship`], with a [`ProgressReporter`] observing the
/// traversal after every batch. Reporting is advisory and does not change
/// the result.
pub fn calculate_kinship_with_reporter(
    children: &AdjacencyMap,
    parents: &AdjacencyMap,
    sinks: &VertexSet,
    backend: Backend,
    reporter: &mut dyn ProgressReporter,
) -> Result<KinshipMatrix> {
    check_vertex_sets(children, parents, sinks)?;
    match backend {
        Backend::TimeOptimised => {
            let mut traversal = Traversal::new(children, parents, sinks, FlatStore::new());
            traversal.run(reporter)?;
            Ok(traversal.into_matrix())
        }
        Backend::MemoryOptimised => {
            let mut traversal = Traversal::new(children, parents, sinks, CompactStore::new());
            traversal.run(reporter)?;
            Ok(traversal.into_matrix())
        }
    }
}

/// Validate that the two adjacency maps share one vertex set, that every
/// parent reference stays inside it, and that the sinks belong to it.
fn check_vertex_sets(
    children: &AdjacencyMap,
    parents: &AdjacencyMap,
    sinks: &VertexSet,
) -> Result<()> {
    if children.len() != parents.len() {
        return Err(KinshipError::PedigreeInconsistency(format!(
            "children map has {} vertices but parents map has {}",
            children.len(),
            parents.len()
        )));
    }
    for &v in parents.keys() {
        if !children.contains_key(&v) {
            return Err(KinshipError::PedigreeInconsistency(format!(
                "vertex {v} has a parent record but no child record"
            )));
        }
    }
    for (&v, parent_list) in parents.iter() {
        for &p in parent_list {
            if !parents.contains_key(&p) {
                return Err(KinshipError::PedigreeInconsistency(format!(
                    "vertex {v} references parent {p} which is not in the pedigree"
                )));
            }
        }
    }
    for &v in sinks {
        if !parents.contains_key(&v) {
            return Err(KinshipError::PedigreeInconsistency(format!(
                "sink vertex {v} is not in the pedigree"
            )));
        }
    }
    Ok(())
}

/// Number of distinct vertices in an adjacency list.
fn distinct_len(list: &[Vertex]) -> usize {
    match list {
        [] => 0,
        [_] => 1,
        [a, b] => {
            if a == b {
                1
            } else {
                2
            }
        }
        _ => {
            let mut seen = AHashSet::with_capacity(list.len());
            list.iter().filter(|v| seen.insert(**v)).count()
        }
    }
}

/// One bounded-memory pass over the pedigree.
struct Traversal<'a, S> {
    children: &'a AdjacencyMap,
    parents: &'a AdjacencyMap,
    sinks: &'a VertexSet,
    store: S,
    scheduler: CutScheduler,
    /// Children of each vertex still waiting to be processed; reaching
    /// zero makes a non-sink row evictable.
    remaining_children: AHashMap<Vertex, usize>,
    /// Parents of each vertex still waiting to be processed; reaching
    /// zero makes the vertex ready.
    remaining_parents: AHashMap<Vertex, usize>,
    processed: usize,
    peak_residents: usize,
}

impl<'a, S: KinshipStore + 'static> Traversal<'a, S> {
    fn new(
        children: &'a AdjacencyMap,
        parents: &'a AdjacencyMap,
        sinks: &'a VertexSet,
        store: S,
    ) -> Self {
        let remaining_children = children
            .iter()
            .map(|(&v, list)| (v, distinct_len(list)))
            .collect();
        let remaining_parents = parents
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(&v, list)| (v, distinct_len(list)))
            .collect();
        Self {
            children,
            parents,
            sinks,
            store,
            scheduler: CutScheduler::new(),
            remaining_children,
            remaining_parents,
            processed: 0,
            peak_residents: 0,
        }
    }

    fn run(&mut self, reporter: &mut dyn ProgressReporter) -> Result<()> {
        // Every founder seeds the queue as its own batch: one new row,
        // nothing evictable yet.
        for (&v, parent_list) in self.parents.iter() {
            if parent_list.is_empty() {
                self.scheduler.push(vec![v], 1.0);
            }
        }

        while let Some((batch, _score)) = self.scheduler.pop() {
            for v in batch {
                self.process_vertex(v)?;
            }
            reporter.report(&Progress {
                processed: self.processed,
                total: self.parents.len(),
                cut_size: self.store.len(),
                queue_len: self.scheduler.len(),
            });
        }

        if self.processed != self.parents.len() {
            return Err(KinshipError::PedigreeInconsistency(format!(
                "{} of {} vertices never became ready; the children and \
                 parents maps disagree or the pedigree contains a cycle",
                self.parents.len() - self.processed,
                self.parents.len()
            )));
        }
        Ok(())
    }

    fn into_matrix(self) -> KinshipMatrix {
        KinshipMatrix::new(Box::new(self.store), self.sinks.clone(), self.peak_residents)
    }

    fn process_vertex(&mut self, v: Vertex) -> Result<()> {
        self.insert_kinship_row(v)?;
        self.release_parents(v)?;

        // A row nothing will ever read: a non-sink whose child count was
        // zero to begin with.
        if !self.sinks.contains(&v)
            && self.remaining_children.get(&v).copied() == Some(0)
        {
            self.remaining_children.remove(&v);
            self.store.evict(v);
        }

        let ready_now = self.collect_ready_children(v)?;
        if !ready_now.is_empty() {
            let score = self.batch_score(&ready_now)?;
            self.scheduler.push(ready_now, score);
        }

        self.processed += 1;
        Ok(())
    }

    /// Evaluate the kinship recurrence for `v` against every resident
    /// vertex and insert the results.
    ///
    /// With parents {a, b}: φ(v, v) = ½·(1 + φ(a, b)) and
    /// φ(v, u) = ½·(φ(a, u) + φ(b, u)). With one recorded parent a:
    /// φ(v, v) = ½ and φ(v, u) = ½·φ(a, u). Founders have φ(v, v) = ½
    /// and zero kinship to everything already resident.
    fn insert_kinship_row(&mut self, v: Vertex) -> Result<()> {
        let parent_list = self
            .parents
            .get(&v)
            .ok_or_else(|| missing_vertex(v, "parents"))?;
        let (first, second) = match parent_list.as_slice() {
            &[] => (None, None),
            &[a] => (Some(a), None),
            &[a, b] => (Some(a), Some(b)),
            _ => {
                return Err(KinshipError::PedigreeInconsistency(format!(
                    "vertex {v} has {} recorded parents; at most two are supported",
                    parent_list.len()
                )))
            }
        };

        let self_kinship = match (first, second) {
            (Some(a), Some(b)) => (1.0 + self.lookup(a, b)?) / 2.0,
            _ => 0.5,
        };

        let residents = self.store.residents();
        let mut row: Vec<(Vertex, Kinship)> = Vec::with_capacity(residents.len());
        for u in residents {
            let value = match (first, second) {
                (Some(a), Some(b)) => (self.lookup(a, u)? + self.lookup(b, u)?) / 2.0,
                (Some(a), None) | (None, Some(a)) => self.lookup(a, u)? / 2.0,
                (None, None) => 0.0,
            };
            row.push((u, value));
        }

        self.store.put_self(v, self_kinship);
        for (u, value) in row {
            self.store.put_pair(v, u, value);
        }
        self.peak_residents = self.peak_residents.max(self.store.len());
        Ok(())
    }

    /// Fetch φ(a, u) for the recurrence. A miss here means a parent row
    /// was evicted too early or never inserted.
    fn lookup(&self, a: Vertex, u: Vertex) -> Result<Kinship> {
        self.store.get(a, u).map_err(|error| match error {
            KinshipError::NotResident(w) => KinshipError::UnknownVertex(w),
            other => other,
        })
    }

    /// Mark `v` as a processed child of each of its parents, evicting any
    /// non-sink parent whose last child this was.
    fn release_parents(&mut self, v: Vertex) -> Result<()> {
        let parent_list = self
            .parents
            .get(&v)
            .ok_or_else(|| missing_vertex(v, "parents"))?;
        let mut previous = None;
        for &p in parent_list {
            if previous == Some(p) {
                continue;
            }
            previous = Some(p);
            let counter = self.remaining_children.get_mut(&p).ok_or_else(|| {
                KinshipError::PedigreeInconsistency(format!(
                    "parent {p} of vertex {v} has no remaining-children counter"
                ))
            })?;
            if *counter == 0 {
                return Err(KinshipError::PedigreeInconsistency(format!(
                    "remaining-children counter of vertex {p} underflowed"
                )));
            }
            *counter -= 1;
            if *counter == 0 {
                self.remaining_children.remove(&p);
                if !self.sinks.contains(&p) {
                    self.store.evict(p);
                }
            }
        }
        Ok(())
    }

    /// Mark `v` as a processed parent of each of its children, returning
    /// the children that became ready as a consequence.
    fn collect_ready_children(&mut self, v: Vertex) -> Result<Vec<Vertex>> {
        let child_list = self
            .children
            .get(&v)
            .ok_or_else(|| missing_vertex(v, "children"))?;
        let mut ready_now = Vec::new();
        let mut seen = AHashSet::with_capacity(child_list.len());
        for &c in child_list {
            if !seen.insert(c) {
                continue;
            }
            let counter = self.remaining_parents.get_mut(&c).ok_or_else(|| {
                KinshipError::PedigreeInconsistency(format!(
                    "child {c} of vertex {v} has no remaining-parents counter"
                ))
            })?;
            if *counter == 0 {
                return Err(KinshipError::PedigreeInconsistency(format!(
                    "remaining-parents counter of vertex {c} underflowed"
                )));
            }
            *counter -= 1;
            if *counter == 0 {
                self.remaining_parents.remove(&c);
                ready_now.push(c);
            }
        }
        Ok(ready_now)
    }

    /// Estimated net change in resident-row count from processing `batch`
    /// next: one new row per member, minus one for every non-sink parent
    /// whose remaining unprocessed children all sit in the batch (its row
    /// will be evicted).
    fn batch_score(&self, batch: &[Vertex]) -> Result<f64> {
        let mut score = batch.len() as f64;
        let batch_set: AHashSet<Vertex> = batch.iter().copied().collect();

        let mut batch_parents = AHashSet::new();
        for &c in batch {
            let parent_list = self
                .parents
                .get(&c)
                .ok_or_else(|| missing_vertex(c, "parents"))?;
            batch_parents.extend(parent_list.iter().copied());
        }

        for &p in batch_parents.iter() {
            if self.sinks.contains(&p) {
                continue;
            }
            let remaining = self.remaining_children.get(&p).copied().ok_or_else(|| {
                KinshipError::PedigreeInconsistency(format!(
                    "parent {p} of a ready batch has no remaining-children counter"
                ))
            })?;
            let child_list = self
                .children
                .get(&p)
                .ok_or_else(|| missing_vertex(p, "children"))?;
            let mut seen = AHashSet::with_capacity(child_list.len());
            let in_batch = child_list
                .iter()
                .filter(|c| batch_set.contains(c) && seen.insert(**c))
                .count();
            if remaining == in_batch {
                score -= 1.0;
            }
        }
        Ok(score)
    }
}

fn missing_vertex(v: Vertex, map: &str) -> KinshipError {
    KinshipError::PedigreeInconsistency(format!("vertex {v} is missing from the {map} map"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build mirrored adjacency maps from (vertex, parents) records.
    fn pedigree_maps(records: &[(Vertex, &[Vertex])]) -> (AdjacencyMap, AdjacencyMap) {
        let mut parents = AdjacencyMap::new();
        let mut children = AdjacencyMap::new();
        for &(v, list) in records {
            parents.insert(v, list.to_vec());
            children.entry(v).or_default();
        }
        for &(v, list) in records {
            let mut previous = None;
            for &p in list {
                if previous == Some(p) {
                    continue;
                }
                previous = Some(p);
                children.entry(p).or_default().push(v);
            }
        }
        (children, parents)
    }

    fn sink_set(ids: &[Vertex]) -> VertexSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_single_founder() {
        let (children, parents) = pedigree_maps(&[(1, &[])]);
        let sinks = sink_set(&[1]);
        let matrix =
            calculate_kinship(&children, &parents, &sinks, Backend::TimeOptimised).unwrap();
        assert_eq!(matrix.get(1, 1).unwrap(), 0.5);
        assert_eq!(matrix.peak_residents(), 1);
    }

    #[test]
    fn test_chain_halves_kinship_per_generation() {
        // 1 -> 2 -> 3 -> 4, single-parent links.
        let (children, parents) =
            pedigree_maps(&[(1, &[]), (2, &[1]), (3, &[2]), (4, &[3])]);
        let sinks = sink_set(&[1, 4]);
        let matrix =
            calculate_kinship(&children, &parents, &sinks, Backend::TimeOptimised).unwrap();
        // Each single-parent step halves the pair kinship: ½ -> ¼ -> ⅛ -> ¹⁄₁₆.
        assert_eq!(matrix.get(1, 4).unwrap(), 0.5 / 8.0);
        assert_eq!(matrix.get(4, 4).unwrap(), 0.5);
    }

    #[test]
    fn test_mismatched_maps_fail() {
        let mut parents = AdjacencyMap::new();
        parents.insert(1, vec![]);
        parents.insert(2, vec![1]);
        let mut children = AdjacencyMap::new();
        children.insert(1, vec![2]);
        let sinks = sink_set(&[2]);
        let result = calculate_kinship(&children, &parents, &sinks, Backend::TimeOptimised);
        assert!(matches!(
            result,
            Err(KinshipError::PedigreeInconsistency(_))
        ));
    }

    #[test]
    fn test_dangling_parent_reference_fails() {
        let (mut children, mut parents) = pedigree_maps(&[(1, &[]), (2, &[1])]);
        parents.insert(2, vec![1, 99]);
        children.entry(2).or_default();
        let sinks = sink_set(&[2]);
        let result = calculate_kinship(&children, &parents, &sinks, Backend::TimeOptimised);
        assert!(matches!(
            result,
            Err(KinshipError::PedigreeInconsistency(_))
        ));
    }

    #[test]
    fn test_three_parents_fail() {
        let mut parents = AdjacencyMap::new();
        parents.insert(1, vec![]);
        parents.insert(2, vec![]);
        parents.insert(3, vec![]);
        parents.insert(4, vec![1, 2, 3]);
        let mut children = AdjacencyMap::new();
        children.insert(1, vec![4]);
        children.insert(2, vec![4]);
        children.insert(3, vec![4]);
        children.insert(4, vec![]);
        let sinks = sink_set(&[4]);
        let result = calculate_kinship(&children, &parents, &sinks, Backend::TimeOptimised);
        assert!(matches!(
            result,
            Err(KinshipError::PedigreeInconsistency(_))
        ));
    }

    #[test]
    fn test_unreachable_vertex_fails() {
        // 1 and 2 form a two-cycle; 3 is a clean founder.
        let mut parents = AdjacencyMap::new();
        parents.insert(1, vec![2]);
        parents.insert(2, vec![1]);
        parents.insert(3, vec![]);
        let mut children = AdjacencyMap::new();
        children.insert(1, vec![2]);
        children.insert(2, vec![1]);
        children.insert(3, vec![]);
        let sinks = sink_set(&[3]);
        let result = calculate_kinship(&children, &parents, &sinks, Backend::TimeOptimised);
        assert!(matches!(
            result,
            Err(KinshipError::PedigreeInconsistency(_))
        ));
    }

    #[test]
    fn test_childless_non_sink_is_evicted() {
        // 3 is childless but not a proband; only 2 is retained.
        let (children, parents) = pedigree_maps(&[(1, &[]), (2, &[1]), (3, &[1])]);
        let sinks = sink_set(&[2]);
        let matrix =
            calculate_kinship(&children, &parents, &sinks, Backend::TimeOptimised).unwrap();
        let residents: Vec<Vertex> = matrix.iter_sinks().collect();
        assert_eq!(residents, vec![2]);
        assert!(matches!(matrix.get(3, 3), Err(KinshipError::NotASink(3))));
    }

    #[test]
    fn test_distinct_len() {
        assert_eq!(distinct_len(&[]), 0);
        assert_eq!(distinct_len(&[7]), 1);
        assert_eq!(distinct_len(&[7, 7]), 1);
        assert_eq!(distinct_len(&[7, 8]), 2);
        assert_eq!(distinct_len(&[1, 2, 1, 3]), 3);
    }
}
