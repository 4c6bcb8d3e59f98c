//! # pairsolve
//!
//! A library for determining three-dimensional atomic structures from a
//! target list of unsigned pairwise distances (a pair distance function),
//! for both finite clusters and periodic crystals.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to keep
//! the stochastic search logic separate from the data models it operates on.
//!
//! - **[`core`]: The Foundation.** Contains stateless data models
//!   (`Atom`, `DistanceTable`, `Lattice`), pure geometry (points-in-sphere
//!   enumeration, basis transforms), and text file I/O.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer owns the search
//!   machinery: the symmetric pair-cost grid with incremental updates, the
//!   free-space and periodic cost calculators, the `Molecule` and `Crystal`
//!   structures behind the [`engine::structure::Cluster`] trait, the
//!   triangulation candidate generators, and the least-squares atom
//!   relaxation.
//!
//! - **[`workflows`]: The Public API.** The highest-level layer. It ties
//!   the engine operations into a complete reconstruction loop that grows,
//!   prunes, and refines a structure until it reproduces the target
//!   distances.

pub mod core;
pub mod engine;
pub mod workflows;
