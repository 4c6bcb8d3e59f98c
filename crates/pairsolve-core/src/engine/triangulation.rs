use itertools::Itertools;
use nalgebra::{Point3, Vector3};
use rand::Rng;

use crate::core::models::atom::{Atom, TriangulationKind};
use crate::core::utils::geometry::{canonical_perpendicular, orthogonal_component};
use crate::core::utils::numeric::{penalty, EPS_DISTANCE};
use crate::engine::error::EngineError;
use crate::engine::structure::Cluster;
use crate::engine::utils::sampling::{plus_minus, weighted_index, weighted_pick};

/// Ordered anchor positions seeding one triangulation attempt.
///
/// Free-space anchors are distinct atoms; periodic anchors are atom
/// sites offset by independent random lattice vectors, so they are
/// always fully populated.
struct Anchor {
    count: usize,
    b0: Point3<f64>,
    b1: Point3<f64>,
    b2: Point3<f64>,
}

fn offset_site<S: Cluster + ?Sized>(
    cluster: &S,
    fitness: &[f64],
    rng: &mut impl Rng,
) -> Result<Point3<f64>, EngineError> {
    let lattice = cluster.lattice().expect("offset sites require a lattice");
    let index = weighted_index(fitness, rng)?;
    let offset = Vector3::new(
        f64::from(rng.gen_range(0..2i32)),
        f64::from(rng.gen_range(0..2i32)),
        f64::from(rng.gen_range(0..2i32)),
    );
    Ok(cluster.atoms()[index].position + lattice.cartesian(offset))
}

fn anchor<S: Cluster + ?Sized>(
    cluster: &S,
    fitness: &[f64],
    rng: &mut impl Rng,
    wanted: usize,
) -> Result<Anchor, EngineError> {
    let origin = Point3::origin();
    if cluster.lattice().is_some() {
        let b0 = offset_site(cluster, fitness, rng)?;
        let b1 = if wanted > 1 {
            offset_site(cluster, fitness, rng)?
        } else {
            origin
        };
        let b2 = if wanted > 2 {
            offset_site(cluster, fitness, rng)?
        } else {
            origin
        };
        return Ok(Anchor {
            count: wanted,
            b0,
            b1,
            b2,
        });
    }
    let count = wanted.min(cluster.count_atoms());
    let picks = weighted_pick(fitness, count, rng)?;
    let position = |i: usize| cluster.atoms()[picks[i]].position;
    Ok(Anchor {
        count,
        b0: position(0),
        b1: if count > 1 { position(1) } else { origin },
        b2: if count > 2 { position(2) } else { origin },
    })
}

fn ensure_room<S: Cluster + ?Sized>(cluster: &S) -> Result<(), EngineError> {
    if cluster.is_full() {
        return Err(EngineError::InvalidStructure(
            "full structure has no room for new positions".into(),
        ));
    }
    Ok(())
}

fn random_distance_pair<S: Cluster + ?Sized>(
    cluster: &S,
    rng: &mut impl Rng,
) -> Option<(usize, usize)> {
    let len = cluster.distance_table().len();
    if cluster.dist_reuse() {
        Some((rng.gen_range(0..len), rng.gen_range(0..len)))
    } else {
        if len < 2 {
            return None;
        }
        let picked = rand::seq::index::sample(rng, len, 2);
        Some((picked.index(0), picked.index(1)))
    }
}

/// Line construction: one anchor, one target distance, emitted in the
/// direction of a second anchor (both ways) or along +z for a lone atom.
pub fn line_candidates<S: Cluster + ?Sized>(
    cluster: &S,
    fitness: &[f64],
    rng: &mut impl Rng,
    ntrials: usize,
    candidates: &mut Vec<Atom>,
) -> Result<usize, EngineError> {
    if ntrials == 0 || cluster.count_atoms() < 1 {
        return Ok(0);
    }
    ensure_room(cluster)?;
    let table = cluster.distance_table();
    let mut pushed = 0;
    let mut attempt = 0;
    while attempt < ntrials {
        let anch = anchor(cluster, fitness, rng, 2)?;
        let mut direction = if anch.count > 1 {
            anch.b1 - anch.b0
        } else {
            Vector3::zeros()
        };
        let norm = direction.norm();
        let from_structure = norm > EPS_DISTANCE;
        if from_structure {
            direction /= norm;
        } else {
            direction = Vector3::z();
        }
        let radius = table.get(rng.gen_range(0..table.len()));

        let mut front = Atom::new("", anch.b0 + direction * radius);
        front.origin = Some(TriangulationKind::Linear);
        candidates.push(front);
        pushed += 1;
        attempt += 1;
        if from_structure {
            // the opposite direction counts as an extra trial
            let mut back = Atom::new("", anch.b0 - direction * radius);
            back.origin = Some(TriangulationKind::Linear);
            candidates.push(back);
            pushed += 1;
            attempt += 1;
        }
    }
    Ok(pushed)
}

/// Triangle construction: two anchors and two target distances close a
/// triangle; both long-axis placements and both perpendicular signs are
/// emitted when a third anchor fixes the plane.
pub fn triangle_candidates<S: Cluster + ?Sized>(
    cluster: &S,
    fitness: &[f64],
    rng: &mut impl Rng,
    ntrials: usize,
    candidates: &mut Vec<Atom>,
) -> Result<usize, EngineError> {
    let enough_anchors = if cluster.lattice().is_some() {
        cluster.count_atoms() >= 1
    } else {
        cluster.count_atoms() >= 2
    };
    if ntrials == 0 || !enough_anchors {
        return Ok(0);
    }
    ensure_room(cluster)?;
    let table = cluster.distance_table();
    let mut pushed = 0;
    let mut attempt = 0;
    while attempt < ntrials {
        let anch = anchor(cluster, fitness, rng, 3)?;
        let Some((i0, i1)) = random_distance_pair(cluster, rng) else {
            return Ok(pushed);
        };
        let r02 = table.get(i0);
        let r12 = table.get(i1);
        let r01 = (anch.b1 - anch.b0).norm();
        if r01 < EPS_DISTANCE {
            attempt += 1;
            continue;
        }
        let x_long = (r02 * r02 + r01 * r01 - r12 * r12) / (2.0 * r01);
        let long_options = [x_long, r01 - x_long];
        let perp2 = r02 * r02 - x_long * x_long;
        let mut perp = perp2.abs().sqrt();
        if perp < EPS_DISTANCE {
            perp = 0.0;
        } else if perp2 < 0.0 {
            attempt += 1;
            continue;
        }
        let perp_options = [-perp, perp];

        let long_dir = (anch.b1 - anch.b0) / r01;
        let mut lattice_plane = false;
        let mut perp_dir = Vector3::zeros();
        if anch.count > 2 {
            perp_dir = orthogonal_component(&(anch.b2 - anch.b0), &long_dir);
            let norm = perp_dir.norm();
            if norm > EPS_DISTANCE {
                perp_dir /= norm;
                lattice_plane = true;
            }
        }
        if !lattice_plane {
            perp_dir = canonical_perpendicular(&long_dir);
        }

        let mut emitted = 0;
        'vertices: for &xl in &long_options {
            for &xp in &perp_options {
                let mut vertex = Atom::new("", anch.b0 + long_dir * xl + perp_dir * xp);
                vertex.origin = Some(TriangulationKind::Planar);
                candidates.push(vertex);
                emitted += 1;
                if !lattice_plane {
                    break 'vertices;
                }
            }
        }
        pushed += emitted;
        attempt += emitted.max(1);
    }
    Ok(pushed)
}

/// Pyramid construction: three anchors and three target distances; every
/// distance permutation is tried and the apex is solved in the anchor
/// frame, giving 0, 1 or 2 candidates per permutation.
pub fn pyramid_candidates<S: Cluster + ?Sized>(
    cluster: &S,
    fitness: &[f64],
    rng: &mut impl Rng,
    ntrials: usize,
    candidates: &mut Vec<Atom>,
) -> Result<usize, EngineError> {
    let enough_anchors = if cluster.lattice().is_some() {
        cluster.count_atoms() >= 1
    } else {
        cluster.count_atoms() >= 3
    };
    if ntrials == 0 || !enough_anchors {
        return Ok(0);
    }
    ensure_room(cluster)?;
    let table = cluster.distance_table();
    let mut pushed = 0;
    let mut attempt = 0;
    while attempt < ntrials {
        let anch = anchor(cluster, fitness, rng, 3)?;
        let picked: Vec<usize> = if cluster.dist_reuse() {
            (0..3).map(|_| rng.gen_range(0..table.len())).collect()
        } else {
            if table.len() < 3 {
                return Ok(pushed);
            }
            rand::seq::index::sample(rng, table.len(), 3).into_vec()
        };

        for perm in picked.iter().permutations(3).unique() {
            attempt += 1;
            let r03 = table.get(*perm[0]);
            let r13 = table.get(*perm[1]);
            let r23 = table.get(*perm[2]);

            // frame: uvi along the base edge, uvj in the base plane
            let mut uvi = anch.b1 - anch.b0;
            let r01 = uvi.norm();
            if r01 < EPS_DISTANCE {
                continue;
            }
            uvi /= r01;
            let v02 = anch.b2 - anch.b0;
            let mut uvj = orthogonal_component(&v02, &uvi);
            let nm_uvj = uvj.norm();
            if nm_uvj < EPS_DISTANCE {
                continue;
            }
            uvj /= nm_uvj;
            let uvk = uvi.cross(&uvj);

            let x_p1 = -0.5 / r01 * (r01 * r01 + r03 * r03 - r13 * r13);
            // apex x-coordinate is 0 in this frame
            let translation = anch.b0 - uvi * x_p1;
            let x_p3 = x_p1 + uvi.dot(&v02);
            let y_p3 = uvj.dot(&v02);
            let h2 = r03 * r03 - x_p1 * x_p1;

            if h2.abs() < EPS_DISTANCE {
                // apex on the base line
                if ((x_p3 * x_p3 + y_p3 * y_p3).sqrt() - r23).abs() > EPS_DISTANCE {
                    continue;
                }
                let mut apex = Atom::new("", translation);
                apex.origin = Some(TriangulationKind::Spatial);
                candidates.push(apex);
                pushed += 1;
                continue;
            } else if h2 < 0.0 {
                continue;
            }
            let y_p4 = 0.5 / y_p3 * (h2 + x_p3 * x_p3 + y_p3 * y_p3 - r23 * r23);
            let z2_p4 = h2 - y_p4 * y_p4;
            if z2_p4.abs() < EPS_DISTANCE {
                // apex in the base plane
                let mut apex = Atom::new("", translation + uvj * y_p4);
                apex.origin = Some(TriangulationKind::Spatial);
                candidates.push(apex);
                pushed += 1;
                continue;
            } else if z2_p4 < 0.0 {
                continue;
            }
            let z_p4 = z2_p4.sqrt();
            let mut top = Atom::new("", translation + uvj * y_p4 + uvk * z_p4);
            top.origin = Some(TriangulationKind::Spatial);
            candidates.push(top);
            pushed += 1;
            // the mirror apex counts as an extra trial
            attempt += 1;
            let mut bottom = Atom::new("", translation + uvj * y_p4 - uvk * z_p4);
            bottom.origin = Some(TriangulationKind::Spatial);
            candidates.push(bottom);
            pushed += 1;
        }
    }
    Ok(pushed)
}

/// Bootstrap for a 1-atom structure: place second atoms along z.
///
/// When the trial budget covers the full enumeration, every unique
/// distance is emitted in both directions; otherwise distances and signs
/// are drawn randomly.
pub fn second_atom_candidates<S: Cluster + ?Sized>(
    cluster: &S,
    rng: &mut impl Rng,
    ntrials: usize,
    candidates: &mut Vec<Atom>,
) -> Result<usize, EngineError> {
    if cluster.count_atoms() != 1 {
        return Err(EngineError::InvalidStructure(
            "second-atom bootstrap requires a 1-atom structure".into(),
        ));
    }
    let base = cluster.atoms()[0].position;
    let table = cluster.distance_table();
    let mut pushed = 0;
    if ntrials > 2 * table.count_unique() {
        for d in table.unique() {
            for sign in [1.0, -1.0] {
                let mut atom = Atom::new("", base + Vector3::z() * (sign * d));
                atom.origin = Some(TriangulationKind::Linear);
                candidates.push(atom);
                pushed += 1;
            }
        }
    } else {
        for _ in 0..ntrials {
            let d = table.get(rng.gen_range(0..table.len())) * plus_minus(rng);
            let mut atom = Atom::new("", base + Vector3::z() * d);
            atom.origin = Some(TriangulationKind::Linear);
            candidates.push(atom);
            pushed += 1;
        }
    }
    Ok(pushed)
}

/// Bootstrap for a 2-atom structure: close triangles over the base pair.
pub fn third_atom_candidates<S: Cluster + ?Sized>(
    cluster: &S,
    rng: &mut impl Rng,
    ntrials: usize,
    candidates: &mut Vec<Atom>,
) -> Result<usize, EngineError> {
    if cluster.count_atoms() != 2 {
        return Err(EngineError::InvalidStructure(
            "third-atom bootstrap requires a 2-atom structure".into(),
        ));
    }
    let table = cluster.distance_table();
    let unique = table.unique();

    // distance pairs: full enumeration when the budget allows it
    let mut pairs: Vec<(f64, f64)> = Vec::new();
    if ntrials > 2 * unique.len() * unique.len() {
        for &d0 in &unique {
            for &d1 in &unique {
                pairs.push((d0, d1));
            }
        }
    } else {
        for _ in 0..ntrials {
            let Some((i0, i1)) = random_distance_pair(cluster, rng) else {
                break;
            };
            pairs.push((table.get(i0), table.get(i1)));
        }
    }

    let a0 = cluster.atoms()[0].position;
    let a1 = cluster.atoms()[1].position;
    let r01 = (a1 - a0).norm();
    if r01 < EPS_DISTANCE {
        return Ok(0);
    }
    let long_dir = (a1 - a0) / r01;
    let cross = Vector3::x().cross(&long_dir);
    let perp_dir = if cross.norm() > EPS_DISTANCE {
        cross / cross.norm()
    } else {
        Vector3::y()
    };

    let mut pushed = 0;
    for (r02, r12) in pairs {
        let x_long = (r02 * r02 + r01 * r01 - r12 * r12) / (2.0 * r01);
        let perp2 = r02 * r02 - x_long * x_long;
        let mut x_perp = perp2.abs().sqrt();
        if x_perp < EPS_DISTANCE {
            x_perp = 0.0;
        } else if perp2 < 0.0 {
            continue;
        } else if rng.gen_range(0..2) == 0 {
            x_perp = -x_perp;
        }
        let mut atom = Atom::new("", a0 + long_dir * x_long + perp_dir * x_perp);
        atom.origin = Some(TriangulationKind::Planar);
        candidates.push(atom);
        pushed += 1;
    }
    Ok(pushed)
}

/// Number of candidate pairs that already realize a target distance
/// well; the fitness measure of lookout mode.
pub fn good_neighbors_count<S: Cluster + ?Sized>(cluster: &S, candidates: &[Atom]) -> Vec<usize> {
    let table = cluster.distance_table();
    let hi_pair_badness = cluster.config().tol_nbad / 10.0;
    let mut counts = vec![0usize; candidates.len()];
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            let d = (candidates[i].position - candidates[j].position).norm();
            let dd = table.get(table.find_nearest(d)) - d;
            if penalty(dd) < hi_pair_badness {
                counts[i] += 1;
                counts[j] += 1;
            }
        }
    }
    counts
}
