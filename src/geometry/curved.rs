//! Curved elements with one or more faces on a circular arc.
//!
//! A face carrying the configured boundary tag is moved onto the arc. The
//! displacement of its nodes is interpolated along the face and extended into
//! the element with a one-sided blend that is `1` on the curved face and `0`
//! on the other two faces:
//!
//! | face | parameter `xi` | blend              |
//! |------|----------------|--------------------|
//! | 0    | `r`            | `-(r + s)/(1 - xi)` |
//! | 1    | `s`            | `(1 + r)/(1 - xi)`  |
//! | 2    | `s`            | `-(r + s)/(1 - xi)` |
//!
//! The blend divides by `1 - xi`, which vanishes only at the vertex where the
//! face displacement is already zero; nodes with `|1 - xi| <= 1e-7` are left
//! unmoved.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::discretization::reference::{NFACES, ReferenceTriangle, vandermonde_1d};
use crate::geometry::metrics::{
    SecondOrderFactors, SurfaceFactors, VolumeFactors, metric_inverse, second_order_factors,
    surface_factors,
};
use crate::mesh_error::MeshError;

const BLEND_GUARD: f64 = 1e-7;

/// Arc onto which faces tagged `tag` are projected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurvedBoundary {
    pub tag: i32,
    pub center: [f64; 2],
    pub radius: f64,
}

impl Default for CurvedBoundary {
    fn default() -> Self {
        Self {
            tag: 5,
            center: [0.0, 0.0],
            radius: 1.0,
        }
    }
}

impl CurvedBoundary {
    pub fn is_curved(&self, etob: &[i32; NFACES]) -> bool {
        etob.contains(&self.tag)
    }
}

/// Endpoints (as vertex indices) and parameter of each face for the blend.
const FACE_ENDS: [[usize; 2]; NFACES] = [[0, 1], [1, 2], [0, 2]];

/// Move the nodes of one element onto `curve`, face by face.
///
/// `x`, `y` hold the straight-sided nodes on entry. Returns `true` when at
/// least one face was curved.
pub fn curve_element_nodes(
    refel: &ReferenceTriangle,
    ex: &[f64; 3],
    ey: &[f64; 3],
    etob: &[i32; NFACES],
    curve: &CurvedBoundary,
    x: &mut [f64],
    y: &mut [f64],
) -> Result<bool, MeshError> {
    let mut curved = false;
    for f in 0..NFACES {
        if etob[f] != curve.tag {
            continue;
        }
        curved = true;
        let vr: &[f64] = if f == 0 { &refel.r } else { &refel.s };
        let [a, b] = FACE_ENDS[f];
        let [cx, cy] = curve.center;

        let mut theta1 = (ey[a] - cy).atan2(ex[a] - cx);
        let mut theta2 = (ey[b] - cy).atan2(ex[b] - cx);
        // keep both angles on the same branch
        if theta2 > 0.0 && theta1 < 0.0 && (theta1 - theta2).abs() > std::f64::consts::PI {
            theta1 += 2.0 * std::f64::consts::PI;
        }
        if theta1 > 0.0 && theta2 < 0.0 && (theta1 - theta2).abs() > std::f64::consts::PI {
            theta2 += 2.0 * std::f64::consts::PI;
        }

        let nodes = &refel.face_nodes[f];
        let fr: Vec<f64> = nodes.iter().map(|&n| vr[n]).collect();
        let mut fdx = DVector::<f64>::zeros(nodes.len());
        let mut fdy = DVector::<f64>::zeros(nodes.len());
        for (i, &n) in nodes.iter().enumerate() {
            let theta = 0.5 * theta1 * (1.0 - fr[i]) + 0.5 * theta2 * (1.0 + fr[i]);
            fdx[i] = cx + curve.radius * theta.cos() - x[n];
            fdy[i] = cy + curve.radius * theta.sin() - y[n];
        }

        // modal coefficients of the face displacement, evaluated at every node
        let vface = vandermonde_1d(refel.order, &fr).lu();
        let singular = || MeshError::InvalidReference(format!("singular face Vandermonde on face {f}"));
        let cdx = vface.solve(&fdx).ok_or_else(singular)?;
        let cdy = vface.solve(&fdy).ok_or_else(singular)?;
        let vvol = vandermonde_1d(refel.order, vr);
        let vdx = &vvol * cdx;
        let vdy = &vvol * cdy;

        for n in 0..refel.np {
            let xi = vr[n];
            if (1.0 - xi).abs() <= BLEND_GUARD {
                continue;
            }
            let (r, s) = (refel.r[n], refel.s[n]);
            let blend = match f {
                1 => (r + 1.0) / (1.0 - xi),
                _ => -(r + s) / (1.0 - xi),
            };
            x[n] += blend * vdx[n];
            y[n] += blend * vdy[n];
        }
    }
    Ok(curved)
}

/// Geometric factors at every node of a (possibly curved) element, from the
/// nodal derivatives of its coordinates.
///
/// Any node with `J <= 0` is a fatal [`MeshError::NonPositiveJacobian`].
pub fn nodal_factors(
    element: usize,
    refel: &ReferenceTriangle,
    x: &[f64],
    y: &[f64],
) -> Result<Vec<VolumeFactors>, MeshError> {
    let xv = DVector::from_column_slice(x);
    let yv = DVector::from_column_slice(y);
    let xr = &refel.dr * &xv;
    let xs = &refel.ds * &xv;
    let yr = &refel.dr * &yv;
    let ys = &refel.ds * &yv;
    (0..refel.np)
        .map(|n| metric_inverse(element, xr[n], xs[n], yr[n], ys[n]))
        .collect()
}

/// Node-resolved geometry of one curved element.
#[derive(Clone, Debug, PartialEq)]
pub struct CurvedFactors {
    pub element: usize,
    /// One entry per volume node.
    pub vgeo: Vec<VolumeFactors>,
    pub ggeo: Vec<SecondOrderFactors>,
    /// Per face, one entry per face node in face order.
    pub sgeo: [Vec<SurfaceFactors>; NFACES],
}

impl CurvedFactors {
    /// Largest `sJ / J` over the nodes of face `face`.
    pub fn max_hinv(&self, face: usize) -> f64 {
        self.sgeo[face].iter().map(|sf| sf.hinv).fold(0.0, f64::max)
    }
}

/// Volume, second-order and surface factors at the nodes of a curved element.
pub fn curved_factors(
    element: usize,
    refel: &ReferenceTriangle,
    x: &[f64],
    y: &[f64],
) -> Result<CurvedFactors, MeshError> {
    let vgeo = nodal_factors(element, refel, x, y)?;
    let ggeo = vgeo.iter().map(second_order_factors).collect();
    let sgeo = std::array::from_fn(|f| {
        refel.face_nodes[f]
            .iter()
            .map(|&n| surface_factors(&vgeo[n], f))
            .collect()
    });
    Ok(CurvedFactors {
        element,
        vgeo,
        ggeo,
        sgeo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::metrics::{affine_factors, physical_nodes};
    use approx::assert_relative_eq;

    #[test]
    fn curved_face_nodes_land_on_the_arc() {
        let refel = ReferenceTriangle::new(4).unwrap();
        // face 0 joins (1, 0) and (0, 1) on the unit circle
        let ex = [1.0, 0.0, 0.0];
        let ey = [0.0, 1.0, 0.0];
        let curve = CurvedBoundary::default();
        let etob = [curve.tag, 0, 0];
        let (mut x, mut y) = physical_nodes(&refel, &ex, &ey);
        let (x0, y0) = (x.clone(), y.clone());
        assert!(curve_element_nodes(&refel, &ex, &ey, &etob, &curve, &mut x, &mut y).unwrap());

        for &n in &refel.face_nodes[0] {
            assert_relative_eq!(x[n].hypot(y[n]), 1.0, epsilon = 1e-12);
        }
        // the opposite faces stay straight
        for &n in refel.face_nodes[1].iter().chain(&refel.face_nodes[2]) {
            assert_relative_eq!(x[n], x0[n], epsilon = 1e-12);
            assert_relative_eq!(y[n], y0[n], epsilon = 1e-12);
        }
        let factors = curved_factors(0, &refel, &x, &y).unwrap();
        assert!(factors.vgeo.iter().all(|v| v.j > 0.0));
        assert_eq!(factors.ggeo.len(), refel.np);
        // outward normals on the arc are radial
        for (sf, &n) in factors.sgeo[0].iter().zip(&refel.face_nodes[0]) {
            let rad = x[n].hypot(y[n]);
            assert_relative_eq!(sf.nx, x[n] / rad, epsilon = 1e-3);
            assert_relative_eq!(sf.ny, y[n] / rad, epsilon = 1e-3);
        }
        // total arc length is a quarter circle
        let length: f64 = factors.sgeo[0]
            .iter()
            .enumerate()
            .map(|(i, sf)| sf.sj * refel.face_mass.row(i).sum())
            .sum();
        assert_relative_eq!(length, std::f64::consts::FRAC_PI_2, epsilon = 1e-3);
    }

    #[test]
    fn straight_element_nodal_factors_match_affine() {
        let refel = ReferenceTriangle::new(3).unwrap();
        let ex = [0.0, 2.0, 0.5];
        let ey = [0.0, 0.2, 1.0];
        let (x, y) = physical_nodes(&refel, &ex, &ey);
        let affine = affine_factors(0, &ex, &ey).unwrap();
        for v in nodal_factors(0, &refel, &x, &y).unwrap() {
            assert_relative_eq!(v.j, affine.j, epsilon = 1e-10);
            assert_relative_eq!(v.rx, affine.rx, epsilon = 1e-10);
            assert_relative_eq!(v.sy, affine.sy, epsilon = 1e-10);
        }
    }

    #[test]
    fn untagged_element_is_left_alone() {
        let refel = ReferenceTriangle::new(2).unwrap();
        let ex = [0.0, 1.0, 0.0];
        let ey = [0.0, 0.0, 1.0];
        let (mut x, mut y) = physical_nodes(&refel, &ex, &ey);
        let before = x.clone();
        let curved = curve_element_nodes(
            &refel,
            &ex,
            &ey,
            &[1, 0, 0],
            &CurvedBoundary::default(),
            &mut x,
            &mut y,
        )
        .unwrap();
        assert!(!curved);
        assert_eq!(x, before);
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let c: CurvedBoundary = serde_json::from_str(r#"{"radius": 2.5}"#).unwrap();
        assert_eq!(c.tag, 5);
        assert_eq!(c.radius, 2.5);
    }
}
