use std::fs;
use std::io::{self, Read, Write};
use std::num::ParseFloatError;
use std::path::Path;

use nalgebra::Point3;
use thiserror::Error;

use super::{header_token, split_header};

#[derive(Debug, Error)]
pub enum RawXyzError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid number on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: ParseFloatError,
    },

    #[error("incomplete coordinate data: {count} numbers is not a multiple of 3")]
    IncompleteData { count: usize },

    #[error("header declares {declared} atoms but the file holds {found}")]
    AtomCountMismatch { declared: usize, found: usize },
}

/// Reads a `rawxyz` snapshot: one atom per line, `x y z`.
///
/// A free-format header is tolerated; if it carries a `NAtoms` token the
/// coordinate count is cross-checked against it.
pub fn read_rawxyz<R: Read>(mut reader: R) -> Result<Vec<Point3<f64>>, RawXyzError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let (header, lines) = split_header(&text);

    let mut numbers = Vec::new();
    for (line_num, line) in lines {
        for token in line.split_whitespace() {
            let value = token.parse::<f64>().map_err(|source| RawXyzError::Parse {
                line: line_num,
                source,
            })?;
            numbers.push(value);
        }
    }
    if numbers.len() % 3 != 0 {
        return Err(RawXyzError::IncompleteData {
            count: numbers.len(),
        });
    }

    let positions: Vec<Point3<f64>> = numbers
        .chunks_exact(3)
        .map(|xyz| Point3::new(xyz[0], xyz[1], xyz[2]))
        .collect();

    if let Some(declared) = header_token::<usize>(&header, "NAtoms") {
        if declared != positions.len() {
            return Err(RawXyzError::AtomCountMismatch {
                declared,
                found: positions.len(),
            });
        }
    }
    Ok(positions)
}

/// Writes a `rawxyz` snapshot.  The default float display round-trips
/// exactly, so a written file reads back to identical coordinates.
pub fn write_rawxyz<W: Write>(mut writer: W, positions: &[Point3<f64>]) -> Result<(), RawXyzError> {
    for p in positions {
        writeln!(writer, "{} {} {}", p.x, p.y, p.z)?;
    }
    Ok(())
}

pub fn load_rawxyz<P: AsRef<Path>>(path: P) -> Result<Vec<Point3<f64>>, RawXyzError> {
    read_rawxyz(fs::File::open(path)?)
}

pub fn save_rawxyz<P: AsRef<Path>>(path: P, positions: &[Point3<f64>]) -> Result<(), RawXyzError> {
    write_rawxyz(fs::File::create(path)?, positions)
}
