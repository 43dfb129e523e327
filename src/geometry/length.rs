//! Characteristic element length (inradius) and its global minimum.

use crate::algs::collectives::all_reduce_min;
use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshError;
use crate::topology::mesh::TriMesh;

/// Inradius `Area / semi-perimeter` of a triangle, via Heron's formula.
///
/// Strictly positive for non-degenerate triangles, `0` for degenerate ones.
pub fn element_characteristic_length(ex: &[f64; 3], ey: &[f64; 3]) -> f64 {
    let l1 = (ex[1] - ex[0]).hypot(ey[1] - ey[0]);
    let l2 = (ex[2] - ex[1]).hypot(ey[2] - ey[1]);
    let l3 = (ex[0] - ex[2]).hypot(ey[0] - ey[2]);
    let sper = 0.5 * (l1 + l2 + l3);
    if sper <= 0.0 {
        return 0.0;
    }
    let area2 = sper * (sper - l1) * (sper - l2) * (sper - l3);
    area2.max(0.0).sqrt() / sper
}

/// Per-element characteristic lengths of the local partition.
pub fn characteristic_lengths(mesh: &TriMesh) -> Vec<f64> {
    mesh.ex
        .iter()
        .zip(&mesh.ey)
        .map(|(ex, ey)| element_characteristic_length(ex, ey))
        .collect()
}

/// Smallest characteristic length over all ranks.
///
/// Every rank returns the same value; among equal minima the lowest rank's
/// value is taken. A rank without elements contributes `+inf`.
pub fn min_characteristic_length<C: Communicator>(
    comm: &C,
    mesh: &TriMesh,
) -> Result<f64, MeshError> {
    let local = characteristic_lengths(mesh)
        .into_iter()
        .fold(f64::INFINITY, f64::min);
    let (hmin, rank) = all_reduce_min(comm, local)?;
    log::debug!("minimum characteristic length {hmin:e} (rank {rank})");
    Ok(hmin)
}
