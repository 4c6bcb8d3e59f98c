use pairsolve::core::io::distance_file::DistanceFileError;
use pairsolve::core::io::rawxyz::RawXyzError;
use pairsolve::engine::error::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] EngineError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read distance file: {0}")]
    DistanceFile(#[from] DistanceFileError),

    #[error("cannot read structure file: {0}")]
    Structure(#[from] RawXyzError),
}

impl CliError {
    /// 1 for configuration problems, 2 for I/O and parse failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Io(_) | CliError::DistanceFile(_) | CliError::Structure(_) => 2,
            _ => 1,
        }
    }
}
