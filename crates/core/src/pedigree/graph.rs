use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{KinshipError, Result};
use crate::kinship::{calculate_kinship, Backend, KinshipMatrix};
use crate::types::{AdjacencyMap, Vertex, VertexSet};

/// Options controlling the text pedigree parser.
///
/// The text format carries one individual per line: the individual's id
/// followed by up to two parent ids, separated by `separator`. A parent
/// column holding one of the `missing_parent` tokens is treated as
/// unknown. Surplus columns are ignored. The first line is skipped when
/// it starts with `#` or when `skip_first_line` is set.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Column separator.
    pub separator: char,
    /// Tokens meaning "parent unknown".
    pub missing_parent: Vec<String>,
    /// Skip the first line unconditionally (a header without a leading `#`).
    pub skip_first_line: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            separator: ' ',
            missing_parent: vec!["-1".to_string(), ".".to_string()],
            skip_first_line: false,
        }
    }
}

/// A pedigree: a directed acyclic graph whose vertices are individuals
/// and whose edges point from each individual to its (at most two)
/// parents.
///
/// The graph is held as two mirrored adjacency maps. A parent list keeps
/// its slots as recorded, so an individual produced by selfing carries
/// the same parent twice; child lists hold each child once.
#[derive(Debug, Clone, Default)]
pub struct Pedigree {
    parents: AdjacencyMap,
    children: AdjacencyMap,
}

impl Pedigree {
    /// Create an empty pedigree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of individuals.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn contains(&self, v: Vertex) -> bool {
        self.parents.contains_key(&v)
    }

    /// Register `v`, with no parents if it is new.
    pub fn add_individual(&mut self, v: Vertex) {
        self.parents.entry(v).or_default();
        self.children.entry(v).or_default();
    }

    /// Record `parent` as the next parent slot of `child`, registering
    /// both individuals. Recording the same parent twice denotes selfing.
    ///
    /// # Errors
    /// Returns an error if `child` already has two recorded parents.
    pub fn add_parent(&mut self, child: Vertex, parent: Vertex) -> Result<()> {
        self.add_individual(child);
        self.add_individual(parent);

        let slots = self.parents.entry(child).or_default();
        if slots.len() == 2 {
            return Err(KinshipError::PedigreeInconsistency(format!(
                "individual {child} already has two recorded parents"
            )));
        }
        slots.push(parent);

        let child_list = self.children.entry(parent).or_default();
        if !child_list.contains(&child) {
            child_list.push(child);
        }
        Ok(())
    }

    /// Record one full parent record for `child`, replacing any earlier
    /// record. A repeated identical record is ignored with a warning, as
    /// in repeated lines of a pedigree file.
    pub fn add_record(&mut self, child: Vertex, parents: &[Vertex]) -> Result<()> {
        if let Some(existing) = self.parents.get(&child) {
            if !existing.is_empty() {
                if existing.as_slice() == parents {
                    log::warn!("individual {child} is recorded twice with the same parents");
                    return Ok(());
                }
                log::warn!(
                    "individual {child} is recorded twice; replacing parents {:?} with {:?}",
                    existing,
                    parents
                );
                self.remove_parent_edges(child);
            }
        }
        self.add_individual(child);
        for &p in parents {
            self.add_parent(child, p)?;
        }
        Ok(())
    }

    fn remove_parent_edges(&mut self, child: Vertex) {
        if let Some(slots) = self.parents.get_mut(&child) {
            let old = std::mem::take(slots);
            for p in old {
                if let Some(child_list) = self.children.get_mut(&p) {
                    child_list.retain(|&c| c != child);
                }
            }
        }
    }

    /// Parse a text pedigree file.
    pub fn from_file<P: AsRef<Path>>(path: P, options: &ParseOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), options)
    }

    /// Parse a text pedigree from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R, options: &ParseOptions) -> Result<Self> {
        let mut pedigree = Pedigree::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = index + 1;
            if line_number == 1 && (options.skip_first_line || line.starts_with('#')) {
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            pedigree.parse_record(&line, line_number, options)?;
        }
        Ok(pedigree)
    }

    fn parse_record(
        &mut self,
        line: &str,
        line_number: usize,
        options: &ParseOptions,
    ) -> Result<()> {
        let mut tokens = line
            .trim()
            .split(options.separator)
            .filter(|token| !token.is_empty());
        let child = match tokens.next() {
            Some(token) => parse_vertex(token, line_number)?,
            None => return Ok(()),
        };
        let mut parents = Vec::with_capacity(2);
        for token in tokens.take(2) {
            if options.missing_parent.iter().any(|missing| missing == token) {
                continue;
            }
            parents.push(parse_vertex(token, line_number)?);
        }
        self.add_record(child, &parents)
    }

    /// Parse a CSV pedigree with an `animal,sire,dam` header
    /// (case-insensitive). Unknown parents are coded as `0`, empty, or
    /// `NA`; ids must be numeric.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.to_lowercase())
            .collect();
        let animal_col = csv_column(&headers, "animal")?;
        let sire_col = csv_column(&headers, "sire")?;
        let dam_col = csv_column(&headers, "dam")?;

        let mut pedigree = Pedigree::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let line_number = index + 2;

            let animal = parse_vertex(
                csv_field(&record, animal_col, line_number)?,
                line_number,
            )?;
            let mut parents = Vec::with_capacity(2);
            for column in [sire_col, dam_col] {
                let raw = csv_field(&record, column, line_number)?;
                if let Some(token) = csv_parent(raw) {
                    parents.push(parse_vertex(token, line_number)?);
                }
            }
            pedigree.add_record(animal, &parents)?;
        }
        Ok(pedigree)
    }

    /// Iterate over all individual ids in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.parents.keys().copied()
    }

    /// Parent slots of `v`, or `None` if `v` is unknown.
    pub fn parents_of(&self, v: Vertex) -> Option<&[Vertex]> {
        self.parents.get(&v).map(Vec::as_slice)
    }

    /// Children of `v`, or `None` if `v` is unknown.
    pub fn children_of(&self, v: Vertex) -> Option<&[Vertex]> {
        self.children.get(&v).map(Vec::as_slice)
    }

    pub fn is_founder(&self, v: Vertex) -> bool {
        self.parents.get(&v).is_some_and(Vec::is_empty)
    }

    /// Individuals without recorded parents.
    pub fn founders(&self) -> VertexSet {
        self.parents
            .iter()
            .filter(|(_, list)| list.is_empty())
            .map(|(&v, _)| v)
            .collect()
    }

    /// Individuals without children: the default proband set.
    pub fn sinks(&self) -> VertexSet {
        self.children
            .iter()
            .filter(|(_, list)| list.is_empty())
            .map(|(&v, _)| v)
            .collect()
    }

    /// The raw parent adjacency map.
    pub fn parents_map(&self) -> &AdjacencyMap {
        &self.parents
    }

    /// The raw child adjacency map.
    pub fn children_map(&self) -> &AdjacencyMap {
        &self.children
    }

    /// Check that the two adjacency maps mirror each other, that no
    /// individual has more than two parent slots, and that nobody is
    /// their own parent.
    pub fn validate(&self) -> Result<()> {
        for (&v, slots) in &self.parents {
            if slots.len() > 2 {
                return Err(KinshipError::PedigreeInconsistency(format!(
                    "individual {v} has {} recorded parents",
                    slots.len()
                )));
            }
            for &p in slots {
                if p == v {
                    return Err(KinshipError::PedigreeInconsistency(format!(
                        "individual {v} is recorded as its own parent"
                    )));
                }
                match self.children.get(&p) {
                    Some(child_list) if child_list.contains(&v) => {}
                    _ => {
                        return Err(KinshipError::PedigreeInconsistency(format!(
                            "individual {v} lists parent {p}, but {p} does not list \
                             {v} as a child"
                        )))
                    }
                }
            }
        }
        for (&v, child_list) in &self.children {
            for &c in child_list {
                match self.parents.get(&c) {
                    Some(slots) if slots.contains(&v) => {}
                    _ => {
                        return Err(KinshipError::PedigreeInconsistency(format!(
                            "individual {v} lists child {c}, but {c} does not list \
                             {v} as a parent"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// The probands together with all of their ancestors.
    ///
    /// # Errors
    /// Returns an error if a proband is not in the pedigree.
    pub fn ascending_genealogy(&self, probands: &VertexSet) -> Result<VertexSet> {
        for &p in probands {
            if !self.contains(p) {
                return Err(KinshipError::PedigreeInconsistency(format!(
                    "proband {p} is not in the pedigree"
                )));
            }
        }
        let mut keep = VertexSet::new();
        let mut stack: Vec<Vertex> = probands.iter().copied().collect();
        while let Some(v) = stack.pop() {
            if !keep.insert(v) {
                continue;
            }
            if let Some(slots) = self.parents.get(&v) {
                stack.extend(slots.iter().copied());
            }
        }
        Ok(keep)
    }

    /// Drop every individual outside the ascending genealogy of
    /// `probands`.
    pub fn reduce_to_ascending(&mut self, probands: &VertexSet) -> Result<()> {
        let keep = self.ascending_genealogy(probands)?;
        self.parents.retain(|v, _| keep.contains(v));
        self.children.retain(|v, _| keep.contains(v));
        // A surviving ancestor may have had children outside the kept set;
        // its parents are all ancestors and survive by construction.
        for (_, child_list) in self.children.iter_mut() {
            child_list.retain(|c| keep.contains(c));
        }
        Ok(())
    }

    /// Kinship matrix over the childless individuals.
    pub fn proband_kinship(&self, backend: Backend) -> Result<KinshipMatrix> {
        let sinks = self.sinks();
        calculate_kinship(&self.children, &self.parents, &sinks, backend)
    }

    /// Kinship matrix over an explicit proband set. The pedigree is first
    /// reduced to the probands' ascending genealogy so unrelated branches
    /// never enter the resident cut.
    pub fn kinship_of(&self, probands: &VertexSet, backend: Backend) -> Result<KinshipMatrix> {
        let mut reduced = self.clone();
        reduced.reduce_to_ascending(probands)?;
        calculate_kinship(&reduced.children, &reduced.parents, probands, backend)
    }
}

fn parse_vertex(token: &str, line: usize) -> Result<Vertex> {
    token.parse().map_err(|_| KinshipError::Parse {
        line,
        message: format!("invalid individual id '{token}'"),
    })
}

fn csv_column(headers: &[String], name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| KinshipError::PedigreeInconsistency(format!("CSV missing '{name}' column")))
}

fn csv_field<'r>(record: &'r csv::StringRecord, column: usize, line: usize) -> Result<&'r str> {
    record.get(column).ok_or_else(|| KinshipError::Parse {
        line,
        message: "row has too few fields".to_string(),
    })
}

/// Interpret a CSV parent field, returning `None` for the unknown-parent
/// codes `0`, empty, and `NA`.
fn csv_parent(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("na") {
        None
    } else {
        Some(trimmed)
    }
}
