use thiserror::Error;

use crate::types::Vertex;

#[derive(Error, Debug)]
pub enum KinshipError {
    #[error("Pedigree inconsistency: {0}")]
    PedigreeInconsistency(String),

    #[error("Vertex {0} was referenced by the kinship recurrence before being processed")]
    UnknownVertex(Vertex),

    #[error("Vertex {0} is not resident in the kinship store")]
    NotResident(Vertex),

    #[error("Vertex {0} is not a proband")]
    NotASink(Vertex),

    #[error("Pedigree parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, KinshipError>;
