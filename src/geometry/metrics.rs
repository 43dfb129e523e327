//! Geometric factors of the affine map from the reference triangle.
//!
//! The physical node of reference point `(r, s)` in an element with vertices
//! `v1, v2, v3` is `-(r + s)/2 v1 + (1 + r)/2 v2 + (1 + s)/2 v3`.
//!
//! Face normals point outward: face 0 joins `v1 v2` (`s = -1`), face 1 joins
//! `v2 v3` (`r + s = 0`), face 2 joins `v3 v1` (`r = -1`).

use bytemuck::{Pod, Zeroable};

use crate::discretization::reference::{NFACES, ReferenceTriangle};
use crate::mesh_error::MeshError;

/// Inverse metric and Jacobian of one element (or one node of a curved one).
///
/// `rx = dr/dx`, `ry = dr/dy`, `sx = ds/dx`, `sy = ds/dy`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VolumeFactors {
    pub rx: f64,
    pub ry: f64,
    pub sx: f64,
    pub sy: f64,
    pub j: f64,
}

/// `J`-weighted metric products for diffusion operators.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SecondOrderFactors {
    pub g00: f64,
    pub g01: f64,
    pub g11: f64,
}

/// Per-face outward unit normal, surface Jacobian and inverse-size estimate.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SurfaceFactors {
    pub nx: f64,
    pub ny: f64,
    pub sj: f64,
    pub inv_j: f64,
    /// `sJ / J` of this side; after setup the larger of both sides of the face.
    pub hinv: f64,
}

/// Volume factors from the vertex coordinates of a straight-sided element.
///
/// Returns [`MeshError::NonPositiveJacobian`] for degenerate or clockwise
/// elements.
pub fn affine_factors(
    element: usize,
    ex: &[f64; 3],
    ey: &[f64; 3],
) -> Result<VolumeFactors, MeshError> {
    let xr = 0.5 * (ex[1] - ex[0]);
    let xs = 0.5 * (ex[2] - ex[0]);
    let yr = 0.5 * (ey[1] - ey[0]);
    let ys = 0.5 * (ey[2] - ey[0]);
    metric_inverse(element, xr, xs, yr, ys)
}

pub(crate) fn metric_inverse(
    element: usize,
    xr: f64,
    xs: f64,
    yr: f64,
    ys: f64,
) -> Result<VolumeFactors, MeshError> {
    let j = xr * ys - xs * yr;
    if !(j > 0.0) {
        return Err(MeshError::NonPositiveJacobian {
            element,
            jacobian: j,
        });
    }
    Ok(VolumeFactors {
        rx: ys / j,
        ry: -xs / j,
        sx: -yr / j,
        sy: xr / j,
        j,
    })
}

pub fn second_order_factors(v: &VolumeFactors) -> SecondOrderFactors {
    SecondOrderFactors {
        g00: v.j * (v.rx * v.rx + v.ry * v.ry),
        g01: v.j * (v.rx * v.sx + v.ry * v.sy),
        g11: v.j * (v.sx * v.sx + v.sy * v.sy),
    }
}

/// Surface factors of face `face` of a straight-sided element.
pub fn surface_factors(v: &VolumeFactors, face: usize) -> SurfaceFactors {
    let (nx, ny) = match face {
        0 => (-v.sx, -v.sy),
        1 => (v.rx + v.sx, v.ry + v.sy),
        _ => (-v.rx, -v.ry),
    };
    let norm = nx.hypot(ny);
    let sj = norm * v.j;
    SurfaceFactors {
        nx: nx / norm,
        ny: ny / norm,
        sj,
        inv_j: 1.0 / v.j,
        hinv: sj / v.j,
    }
}

/// All face factors of one element, in face order.
pub fn element_surface_factors(v: &VolumeFactors) -> [SurfaceFactors; NFACES] {
    std::array::from_fn(|f| surface_factors(v, f))
}

/// Straight-sided physical node coordinates of one element.
pub fn physical_nodes(refel: &ReferenceTriangle, ex: &[f64; 3], ey: &[f64; 3]) -> (Vec<f64>, Vec<f64>) {
    refel
        .r
        .iter()
        .zip(&refel.s)
        .map(|(&r, &s)| {
            let (w1, w2, w3) = (-0.5 * (r + s), 0.5 * (1.0 + r), 0.5 * (1.0 + s));
            (
                w1 * ex[0] + w2 * ex[1] + w3 * ex[2],
                w1 * ey[0] + w2 * ey[1] + w3 * ey[2],
            )
        })
        .unzip()
}
