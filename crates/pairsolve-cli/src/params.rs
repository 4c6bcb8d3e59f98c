use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CliError, Result};

/// Run parameters, merged from defaults, the parameter file and the
/// command line (later sources win).
#[derive(Debug, Clone)]
pub struct Params {
    // IO
    pub distfile: Option<PathBuf>,
    pub inistru: Option<PathBuf>,
    pub outstru: Option<PathBuf>,
    // structure kind
    pub crystal: bool,
    pub latpar: [f64; 6],
    pub rmax: Option<f64>,
    pub distreuse: bool,
    pub natoms: Option<usize>,
    pub formula: Option<Vec<(String, usize)>>,
    pub radii: Option<Vec<(String, f64)>>,
    pub fixed_atoms: Vec<usize>,
    // builder tuning
    pub tol_nbad: Option<f64>,
    pub tol_r: Option<f64>,
    pub promotefrac: Option<f64>,
    pub promotejump: Option<bool>,
    pub promoterelax: Option<bool>,
    pub demoterelax: Option<bool>,
    pub lookout_prob: Option<f64>,
    pub costweights: Option<(f64, f64)>,
    // run control
    pub rngseed: Option<u64>,
    pub steps: usize,
    pub dist_trials: Option<usize>,
    pub tri_trials: Option<usize>,
    pub pyr_trials: Option<usize>,
    // constraints
    pub bangle_range: Option<(f64, f64, f64)>,
    pub max_dist: Option<f64>,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            distfile: None,
            inistru: None,
            outstru: None,
            crystal: false,
            latpar: [1.0, 1.0, 1.0, 90.0, 90.0, 90.0],
            rmax: None,
            distreuse: false,
            natoms: None,
            formula: None,
            radii: None,
            fixed_atoms: Vec::new(),
            tol_nbad: None,
            tol_r: None,
            promotefrac: None,
            promotejump: None,
            promoterelax: None,
            demoterelax: None,
            lookout_prob: None,
            costweights: None,
            rngseed: None,
            steps: 10_000,
            dist_trials: None,
            tri_trials: None,
            pyr_trials: None,
            bangle_range: None,
            max_dist: None,
        }
    }
}

impl Params {
    /// Reads `key=value` lines from a parameter file; blank lines and
    /// `#` comments are skipped.
    pub fn load_parfile(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)?;
        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(CliError::Config(format!(
                    "{}:{}: expected key=value, got '{line}'",
                    path.display(),
                    line_num + 1
                )));
            };
            self.apply(key.trim(), value.trim())?;
        }
        Ok(())
    }

    /// Applies one `key=value` assignment.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "distfile" => self.distfile = Some(PathBuf::from(value)),
            "inistru" => self.inistru = Some(PathBuf::from(value)),
            "outstru" => self.outstru = Some(PathBuf::from(value)),
            "crystal" => self.crystal = parse_bool(key, value)?,
            "latpar" => {
                let values = parse_floats(key, value)?;
                if values.len() != 6 {
                    return Err(CliError::Config(format!(
                        "latpar needs 6 values (a, b, c, alpha, beta, gamma), got {}",
                        values.len()
                    )));
                }
                self.latpar.copy_from_slice(&values);
            }
            "rmax" => self.rmax = Some(parse_number(key, value)?),
            "distreuse" => self.distreuse = parse_bool(key, value)?,
            "natoms" => self.natoms = Some(parse_number(key, value)?),
            "formula" => self.formula = Some(parse_formula(value)?),
            "radii" => self.radii = Some(parse_radii(value)?),
            "fixed_atoms" => {
                self.fixed_atoms = value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_number(key, s))
                    .collect::<Result<Vec<usize>>>()?;
            }
            "tol_nbad" => self.tol_nbad = Some(parse_number(key, value)?),
            "tol_r" => self.tol_r = Some(parse_number(key, value)?),
            "promotefrac" => self.promotefrac = Some(parse_number(key, value)?),
            "promotejump" => self.promotejump = Some(parse_bool(key, value)?),
            "promoterelax" => self.promoterelax = Some(parse_bool(key, value)?),
            "demoterelax" => self.demoterelax = Some(parse_bool(key, value)?),
            "lookout_prob" => self.lookout_prob = Some(parse_number(key, value)?),
            "costweights" => {
                let values = parse_floats(key, value)?;
                if values.len() != 2 {
                    return Err(CliError::Config(format!(
                        "costweights needs 2 values (distance, overlap), got {}",
                        values.len()
                    )));
                }
                self.costweights = Some((values[0], values[1]));
            }
            "rngseed" => self.rngseed = Some(parse_number(key, value)?),
            "steps" => self.steps = parse_number(key, value)?,
            "dist_trials" => self.dist_trials = Some(parse_number(key, value)?),
            "tri_trials" => self.tri_trials = Some(parse_number(key, value)?),
            "pyr_trials" => self.pyr_trials = Some(parse_number(key, value)?),
            "bangle_range" => {
                let values = parse_floats(key, value)?;
                match values.as_slice() {
                    [lo, hi] => self.bangle_range = Some((*lo, *hi, 0.0)),
                    [lo, hi, bond] => self.bangle_range = Some((*lo, *hi, *bond)),
                    _ => {
                        return Err(CliError::Config(
                            "bangle_range needs 2 or 3 values (lo, hi[, max bond distance])"
                                .into(),
                        ))
                    }
                }
            }
            "max_dist" => self.max_dist = Some(parse_number(key, value)?),
            _ => {
                return Err(CliError::Config(format!("unknown parameter '{key}'")));
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(CliError::Config(format!(
            "{key}: expected a boolean, got '{value}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("{key}: cannot parse '{value}'")))
}

/// Parses a chemical formula like `C60` or `Na4Cl4` into species counts.
fn parse_formula(value: &str) -> Result<Vec<(String, usize)>> {
    let mut formula: Vec<(String, usize)> = Vec::new();
    let mut chars = value.chars().peekable();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_uppercase() {
            return Err(CliError::Config(format!(
                "formula: expected an element symbol at '{}'",
                chars.collect::<String>()
            )));
        }
        let mut element = String::new();
        element.push(chars.next().expect("peeked character is present"));
        while let Some(&c) = chars.peek() {
            if c.is_ascii_lowercase() {
                element.push(chars.next().expect("peeked character is present"));
            } else {
                break;
            }
        }
        let mut digits = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                digits.push(chars.next().expect("peeked character is present"));
            } else {
                break;
            }
        }
        let count = if digits.is_empty() {
            1
        } else {
            parse_number("formula", &digits)?
        };
        formula.push((element, count));
    }
    if formula.is_empty() {
        return Err(CliError::Config("formula: no species given".into()));
    }
    Ok(formula)
}

/// Parses a radii table like `Na:0.97,Cl:1.81`.
fn parse_radii(value: &str) -> Result<Vec<(String, f64)>> {
    value
        .split(',')
        .map(|entry| {
            let (element, radius) = entry.trim().split_once(':').ok_or_else(|| {
                CliError::Config(format!("radii: expected element:value, got '{entry}'"))
            })?;
            Ok((element.trim().to_string(), parse_number("radii", radius.trim())?))
        })
        .collect()
}

fn parse_floats(key: &str, value: &str) -> Result<Vec<f64>> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| parse_number(key, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_simple_assignments() {
        let mut p = Params::default();
        p.apply("natoms", "12").unwrap();
        p.apply("crystal", "true").unwrap();
        p.apply("rmax", "8.5").unwrap();
        p.apply("latpar", "2, 2, 2, 90, 90, 120").unwrap();
        assert_eq!(p.natoms, Some(12));
        assert!(p.crystal);
        assert_eq!(p.rmax, Some(8.5));
        assert_eq!(p.latpar, [2.0, 2.0, 2.0, 90.0, 90.0, 120.0]);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let mut p = Params::default();
        assert!(matches!(
            p.apply("no_such_key", "1"),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            p.apply("natoms", "a dozen"),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            p.apply("latpar", "1, 2, 3"),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn formula_and_radii_are_parsed() {
        let mut p = Params::default();
        p.apply("formula", "Na4Cl4").unwrap();
        assert_eq!(
            p.formula,
            Some(vec![("Na".to_string(), 4), ("Cl".to_string(), 4)])
        );
        p.apply("formula", "C60").unwrap();
        assert_eq!(p.formula, Some(vec![("C".to_string(), 60)]));
        p.apply("radii", "Na:0.97, Cl:1.81").unwrap();
        assert_eq!(
            p.radii,
            Some(vec![("Na".to_string(), 0.97), ("Cl".to_string(), 1.81)])
        );
        assert!(p.apply("formula", "4C").is_err());
        assert!(p.apply("radii", "Na=0.97").is_err());
    }

    #[test]
    fn bangle_range_accepts_two_or_three_values() {
        let mut p = Params::default();
        p.apply("bangle_range", "90, 120").unwrap();
        assert_eq!(p.bangle_range, Some((90.0, 120.0, 0.0)));
        p.apply("bangle_range", "90 120 1.8").unwrap();
        assert_eq!(p.bangle_range, Some((90.0, 120.0, 1.8)));
    }
}
