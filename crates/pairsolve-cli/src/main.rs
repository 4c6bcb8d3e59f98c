mod error;
mod logging;
mod params;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use pairsolve::core::io::{distance_file, rawxyz};
use pairsolve::core::models::distance_table::DistanceTable;
use pairsolve::core::models::lattice::Lattice;
use pairsolve::engine::config::{BuildConfig, TrialCounts};
use pairsolve::engine::filters::{AtomFilter, BondAngleFilter, LoneAtomFilter};
use pairsolve::engine::structure::{Cluster, Crystal, Molecule};
use pairsolve::workflows::{reconstruct, ReconstructReport, ReconstructSettings};

use crate::error::{CliError, Result};
use crate::params::Params;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Determine an atomic structure from a list of target pair distances.",
    help_template = HELP_TEMPLATE,
    after_help = "Recognized parameters: distfile, inistru, outstru, crystal, latpar, \
rmax, distreuse, natoms, formula, radii, fixed_atoms, tol_nbad, tol_r, promotefrac, \
promotejump, promoterelax, demoterelax, lookout_prob, costweights, rngseed, steps, \
dist_trials, tri_trials, pyr_trials, bangle_range, max_dist."
)]
struct Cli {
    /// Read parameters from FILE (key=value lines)
    #[arg(short, long, value_name = "FILE")]
    parfile: Option<PathBuf>,

    /// Distance file and/or key=value parameter overrides
    #[arg(value_name = "[DISTFILE] [KEY=VALUE]...")]
    arguments: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut params = Params::default();
    if let Some(parfile) = &cli.parfile {
        params.load_parfile(parfile)?;
    }
    for argument in &cli.arguments {
        match argument.split_once('=') {
            Some((key, value)) => params.apply(key.trim(), value.trim())?,
            None => params.distfile = Some(PathBuf::from(argument)),
        }
    }

    let distfile = params
        .distfile
        .clone()
        .ok_or_else(|| CliError::Config("no distance file given".into()))?;
    let table = if params.crystal {
        distance_file::load_distance_table_unrestricted(&distfile)?
    } else {
        distance_file::load_distance_table(&distfile)?
    };
    info!(
        file = %distfile.display(),
        distances = table.len(),
        "loaded target distances"
    );

    let config = build_config(&params);
    let filters = build_filters(&params, &table);

    let mut rng = match params.rngseed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let settings = ReconstructSettings {
        max_steps: params.steps,
        trials: trial_counts(&params),
    };

    let report = if params.crystal {
        let [a, b, c, alpha, beta, gamma] = params.latpar;
        let lattice = Lattice::from_parameters(a, b, c, alpha, beta, gamma)
            .map_err(pairsolve::engine::error::EngineError::from)?;
        let mut crystal = Crystal::with_config(&table, lattice, config)?;
        if let Some(rmax) = params.rmax {
            crystal.set_rmax(rmax)?;
        }
        if let Some(formula) = &params.formula {
            crystal.set_chemical_formula(formula)?;
        } else {
            let natoms = params.natoms.ok_or_else(|| {
                CliError::Config("crystal mode requires natoms or formula".into())
            })?;
            crystal.set_max_atom_count(natoms)?;
        }
        if let Some(radii) = &params.radii {
            crystal.fetch_atom_radii(radii.iter().cloned().collect());
        }
        crystal.set_filters(filters);
        seed_initial_structure(&mut crystal, &params)?;
        reconstruct(&mut crystal, &mut rng, &settings)?
    } else {
        let mut molecule = Molecule::with_config(table, config);
        molecule.set_dist_reuse(params.distreuse)?;
        let natoms = params
            .natoms
            .or_else(|| params.formula.as_ref().map(|f| f.iter().map(|(_, n)| n).sum()));
        if let Some(natoms) = natoms {
            molecule.set_max_atom_count(natoms)?;
        }
        molecule.set_filters(filters);
        seed_initial_structure(&mut molecule, &params)?;
        reconstruct(&mut molecule, &mut rng, &settings)?
    };

    summarize(&report);
    if let Some(outstru) = &params.outstru {
        rawxyz::save_rawxyz(outstru, &report.best_positions)?;
        info!(file = %outstru.display(), "saved best structure");
    }
    Ok(())
}

fn build_config(params: &Params) -> BuildConfig {
    let mut config = BuildConfig::default();
    if let Some(v) = params.tol_nbad {
        config.tol_nbad = v;
    }
    if let Some(v) = params.tol_r {
        config.tol_r = v;
    }
    if let Some(v) = params.promotefrac {
        config.promote_frac = v;
    }
    if let Some(v) = params.promotejump {
        config.promote_jump = v;
    }
    if let Some(v) = params.promoterelax {
        config.promote_relax = v;
    }
    if let Some(v) = params.demoterelax {
        config.demote_relax = v;
    }
    if let Some(v) = params.lookout_prob {
        config.lookout_prob = v;
    }
    if let Some((distance, overlap)) = params.costweights {
        config.cost_weights.distance = distance;
        config.cost_weights.overlap = overlap;
    }
    config
}

fn trial_counts(params: &Params) -> TrialCounts {
    let mut trials = TrialCounts::default();
    if let Some(v) = params.dist_trials {
        trials.linear = v;
    }
    if let Some(v) = params.tri_trials {
        trials.planar = v;
    }
    if let Some(v) = params.pyr_trials {
        trials.spatial = v;
    }
    trials
}

fn build_filters(params: &Params, table: &DistanceTable) -> Vec<Arc<dyn AtomFilter>> {
    let mut filters: Vec<Arc<dyn AtomFilter>> = Vec::new();
    if let Some((lo_deg, hi_deg, max_bond)) = params.bangle_range {
        // an unset bond reach defaults to just past the shortest target
        let max_bond_dist = if max_bond > 0.0 {
            max_bond
        } else {
            1.25 * table.get(0)
        };
        filters.push(Arc::new(BondAngleFilter {
            lo_deg,
            hi_deg,
            max_bond_dist,
        }));
    }
    if let Some(max_dist) = params.max_dist {
        filters.push(Arc::new(LoneAtomFilter { max_dist }));
    }
    filters
}

fn seed_initial_structure<S: Cluster + ?Sized>(cluster: &mut S, params: &Params) -> Result<()> {
    let Some(inistru) = &params.inistru else {
        return Ok(());
    };
    let positions = rawxyz::load_rawxyz(inistru)?;
    for p in positions {
        cluster.add(pairsolve::core::models::atom::Atom::new("", p))?;
    }
    for &index in &params.fixed_atoms {
        cluster.fix_atom(index)?;
    }
    info!(
        file = %inistru.display(),
        atoms = cluster.count_atoms(),
        fixed = params.fixed_atoms.len(),
        "seeded initial structure"
    );
    Ok(())
}

fn summarize(report: &ReconstructReport) {
    println!(
        "{} after {} steps: cost {:.6} ({} promotions, {} demotions)",
        if report.converged {
            "converged"
        } else {
            "stopped"
        },
        report.steps,
        report.best_cost,
        report.promotions,
        report.demotions
    );
    for p in &report.best_positions {
        println!("{} {} {}", p.x, p.y, p.z);
    }
}
