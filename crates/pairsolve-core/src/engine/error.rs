use thiserror::Error;

use crate::core::io::distance_file::DistanceFileError;
use crate::core::io::rawxyz::RawXyzError;
use crate::core::models::distance_table::DistanceTableError;
use crate::core::models::lattice::LatticeError;
use crate::engine::utils::sampling::SamplingError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid distance table: {source}")]
    InvalidDistanceTable {
        #[from]
        source: DistanceTableError,
    },

    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    #[error("index {index} out of range for {len} atoms")]
    OutOfRange { index: usize, len: usize },

    #[error("invalid lattice: {source}")]
    Lattice {
        #[from]
        source: LatticeError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("distance file error: {source}")]
    DistanceFile {
        #[from]
        source: DistanceFileError,
    },

    #[error("structure file error: {source}")]
    StructureFile {
        #[from]
        source: RawXyzError,
    },

    #[error("sampling failed: {source}")]
    Sampling {
        #[from]
        source: SamplingError,
    },
}
