use std::fmt::Debug;

use crate::core::models::atom::Atom;

/// A veto applied to candidate atoms before they are scored.
///
/// Filters express external constraints (bonding geometry, connectivity)
/// the distance cost alone does not enforce.
pub trait AtomFilter: Debug + Send + Sync {
    fn check(&self, candidate: &Atom, atoms: &[Atom]) -> bool;
}

/// Rejects candidates that would sit farther than `max_dist` from every
/// existing atom.
#[derive(Debug, Clone, Copy)]
pub struct LoneAtomFilter {
    pub max_dist: f64,
}

impl AtomFilter for LoneAtomFilter {
    fn check(&self, candidate: &Atom, atoms: &[Atom]) -> bool {
        if atoms.is_empty() {
            return true;
        }
        atoms
            .iter()
            .any(|a| (a.position - candidate.position).norm() <= self.max_dist)
    }
}

/// Rejects candidates whose bond angles fall outside `[lo_deg, hi_deg]`.
///
/// Atoms within `max_bond_dist` of the candidate count as bonded
/// neighbors; the angle at the candidate is checked for every neighbor
/// pair.
#[derive(Debug, Clone, Copy)]
pub struct BondAngleFilter {
    pub lo_deg: f64,
    pub hi_deg: f64,
    pub max_bond_dist: f64,
}

impl AtomFilter for BondAngleFilter {
    fn check(&self, candidate: &Atom, atoms: &[Atom]) -> bool {
        let bonds: Vec<_> = atoms
            .iter()
            .map(|a| a.position - candidate.position)
            .filter(|v| v.norm() <= self.max_bond_dist)
            .collect();
        for (i, u) in bonds.iter().enumerate() {
            for v in &bonds[i + 1..] {
                let cosine = (u.dot(v) / (u.norm() * v.norm())).clamp(-1.0, 1.0);
                let angle = cosine.acos().to_degrees();
                if angle < self.lo_deg || angle > self.hi_deg {
                    return false;
                }
            }
        }
        true
    }
}
