pub mod error;
pub mod kinship;
pub mod pedigree;
pub mod types;

pub use error::{KinshipError, Result};
pub use kinship::{calculate_kinship, Backend, KinshipMatrix};
pub use pedigree::Pedigree;
