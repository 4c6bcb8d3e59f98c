use rand::Rng;
use tracing::{debug, instrument};

use crate::engine::error::EngineError;
use crate::engine::relax::relax_worst;
use crate::engine::structure::Cluster;
use crate::engine::utils::sampling::weighted_pick;

/// Shrinks the structure by up to `count` atoms.
///
/// Victims are drawn without replacement with probability proportional
/// to their badness; fixed atoms are exempt.  Returns how many atoms
/// were actually removed.
#[instrument(skip_all, name = "degenerate_task")]
pub fn run<S, R>(cluster: &mut S, rng: &mut R, count: usize) -> Result<usize, EngineError>
where
    S: Cluster + ?Sized,
    R: Rng,
{
    let count = count.min(cluster.count_atoms());
    if count == 0 {
        return Ok(0);
    }
    let mut free_indices = Vec::new();
    let mut free_badness = Vec::new();
    for (index, atom) in cluster.atoms().iter().enumerate() {
        if atom.fixed {
            continue;
        }
        free_indices.push(index);
        free_badness.push(atom.badness());
    }
    if free_indices.is_empty() {
        return Ok(0);
    }
    let count = count.min(free_indices.len());

    let picks = weighted_pick(&free_badness, count, rng)?;
    let victims: Vec<usize> = picks.iter().map(|&p| free_indices[p]).collect();
    cluster.pop_many(&victims)?;
    debug!(removed = count, atoms = cluster.count_atoms(), "demoted atoms");

    if cluster.config().demote_relax && cluster.count_atoms() > 1 {
        relax_worst(cluster)?;
    }
    cluster.normalize();
    Ok(count)
}
