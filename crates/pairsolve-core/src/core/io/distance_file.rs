use std::fs;
use std::io::{self, Read};
use std::num::ParseFloatError;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use super::{header_token, split_header};
use crate::core::models::distance_table::{DistanceTable, DistanceTableError};

#[derive(Debug, Error)]
pub enum DistanceFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid number on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: ParseFloatError,
    },

    #[error("no numeric data found")]
    NoData,

    #[error("header declares {declared} atoms but the table implies {implied}")]
    AtomCountMismatch { declared: usize, implied: usize },

    #[error(transparent)]
    Table(#[from] DistanceTableError),
}

/// Parses a distance-table text file.
///
/// Lines before the first numeric line form a free-format header.  Each
/// numeric line contributes its first column; further columns are ignored.
/// A `NAtoms` header token, when present, is cross-checked against the
/// table length.
pub fn read_distance_table<R: Read>(mut reader: R) -> Result<DistanceTable, DistanceFileError> {
    let (header, values) = parse(&mut reader)?;
    let table = DistanceTable::new(values)?;
    cross_check(&header, &table)?;
    Ok(table)
}

/// As [`read_distance_table`] but without the triangular-length check,
/// for crystal targets whose tables hold unique distances.
pub fn read_distance_table_unrestricted<R: Read>(
    mut reader: R,
) -> Result<DistanceTable, DistanceFileError> {
    let (_, values) = parse(&mut reader)?;
    Ok(DistanceTable::unrestricted(values)?)
}

pub fn load_distance_table<P: AsRef<Path>>(path: P) -> Result<DistanceTable, DistanceFileError> {
    let file = fs::File::open(path)?;
    read_distance_table(file)
}

pub fn load_distance_table_unrestricted<P: AsRef<Path>>(
    path: P,
) -> Result<DistanceTable, DistanceFileError> {
    let file = fs::File::open(path)?;
    read_distance_table_unrestricted(file)
}

fn parse<R: Read>(reader: &mut R) -> Result<(String, Vec<f64>), DistanceFileError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let (header, lines) = split_header(&text);
    let mut values = Vec::with_capacity(lines.len());
    for (line_num, line) in lines {
        let first = line
            .split_whitespace()
            .next()
            .expect("data lines are non-blank");
        let value = first.parse::<f64>().map_err(|source| DistanceFileError::Parse {
            line: line_num,
            source,
        })?;
        values.push(value);
    }
    if values.is_empty() {
        return Err(DistanceFileError::NoData);
    }
    debug!(
        distances = values.len(),
        header_bytes = header.len(),
        "parsed distance file"
    );
    Ok((header, values))
}

fn cross_check(header: &str, table: &DistanceTable) -> Result<(), DistanceFileError> {
    if let Some(declared) = header_token::<usize>(header, "NAtoms") {
        let implied = table.est_num_atoms();
        if declared != implied {
            return Err(DistanceFileError::AtomCountMismatch { declared, implied });
        }
    }
    Ok(())
}
