//! Pedigree model and parsers.

pub mod graph;

pub use graph::{ParseOptions, Pedigree};
