//! Nodal reference triangle of arbitrary order.
//!
//! The reference element is `{(r, s) : r >= -1, s >= -1, r + s <= 0}` with
//! vertices `v0 = (-1, -1)`, `v1 = (1, -1)`, `v2 = (-1, 1)`. Nodes are the
//! warp-and-blend set, which reduces to Gauss-Lobatto-Legendre points on every
//! face, and the modal basis is the orthonormal Dubiner basis.
//!
//! Face `f` joins vertices [`FACE_VERTICES`]`[f]`; face node lists run from the
//! first vertex of the pair to the second.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::mesh_error::MeshError;

/// Vertices per element.
pub const NVERTS: usize = 3;
/// Faces per element.
pub const NFACES: usize = 3;
/// Vertex pair spanned by each face.
pub const FACE_VERTICES: [[usize; 2]; NFACES] = [[0, 1], [1, 2], [2, 0]];

/// Optimised warp-and-blend parameters for orders 1..=15.
const ALPHA_OPT: [f64; 15] = [
    0.0000, 0.0000, 1.4152, 0.1001, 0.2751, 0.9800, 1.0999, 1.2832, 1.3648, 1.4773, 1.4959,
    1.5743, 1.5770, 1.6223, 1.6258,
];

const NODETOL: f64 = 1e-10;

/// Precomputed reference operators for one polynomial order.
///
/// All matrices are `nalgebra` dense matrices indexed `(row, col)`.
#[derive(Clone, Debug)]
pub struct ReferenceTriangle {
    pub order: usize,
    /// Nodes per element.
    pub np: usize,
    /// Nodes per face.
    pub nfp: usize,
    pub r: Vec<f64>,
    pub s: Vec<f64>,
    /// Volume node indices on each face, ordered along the face.
    pub face_nodes: [Vec<usize>; NFACES],
    /// Volume node index of each vertex.
    pub vertex_nodes: [usize; NVERTS],
    /// 1D Gauss-Lobatto-Legendre nodes on `[-1, 1]` (the face parameter).
    pub face_gll: Vec<f64>,
    pub v: DMatrix<f64>,
    pub dr: DMatrix<f64>,
    pub ds: DMatrix<f64>,
    pub mm: DMatrix<f64>,
    pub srr: DMatrix<f64>,
    pub srs: DMatrix<f64>,
    pub ssr: DMatrix<f64>,
    pub sss: DMatrix<f64>,
    /// Mass matrix of the reference face `[-1, 1]` (`Nfp x Nfp`).
    pub face_mass: DMatrix<f64>,
    /// Surface lift `Np x (NFACES * Nfp)`.
    pub lift: DMatrix<f64>,
}

impl ReferenceTriangle {
    /// Build the operators for nodal order `order >= 1`.
    pub fn new(order: usize) -> Result<Self, MeshError> {
        if order == 0 {
            return Err(MeshError::InvalidReference(
                "nodal order must be at least 1".into(),
            ));
        }
        let n = order;
        let np = (n + 1) * (n + 2) / 2;
        let nfp = n + 1;

        let (r, s) = warp_blend_nodes(n)?;
        let v = vandermonde_2d(n, &r, &s);
        let (vr, vs) = grad_vandermonde_2d(n, &r, &s);
        let vinv = v
            .clone()
            .try_inverse()
            .ok_or_else(|| MeshError::InvalidReference(format!("singular Vandermonde, N={n}")))?;
        let dr = &vr * &vinv;
        let ds = &vs * &vinv;
        let mm = vinv.transpose() * &vinv;

        let srr = dr.transpose() * &mm * &dr;
        let srs = dr.transpose() * &mm * &ds;
        let ssr = ds.transpose() * &mm * &dr;
        let sss = ds.transpose() * &mm * &ds;

        let face_nodes = find_face_nodes(&r, &s, nfp)?;
        let vertex_nodes = [0, n, np - 1];

        let face_gll = jacobi_gl(0.0, 0.0, n);
        let v1d = vandermonde_1d(n, &face_gll);
        let face_mass = (&v1d * v1d.transpose())
            .try_inverse()
            .ok_or_else(|| MeshError::InvalidReference(format!("singular face Vandermonde, N={n}")))?;

        let mut emat = DMatrix::<f64>::zeros(np, NFACES * nfp);
        for (f, nodes) in face_nodes.iter().enumerate() {
            for (i, &vid) in nodes.iter().enumerate() {
                for j in 0..nfp {
                    emat[(vid, f * nfp + j)] = face_mass[(i, j)];
                }
            }
        }
        let lift = &v * (v.transpose() * emat);

        Ok(Self {
            order: n,
            np,
            nfp,
            r,
            s,
            face_nodes,
            vertex_nodes,
            face_gll,
            v,
            dr,
            ds,
            mm,
            srr,
            srs,
            ssr,
            sss,
            face_mass,
            lift,
        })
    }

    /// Number of nodes strictly inside the element.
    pub fn n_interior(&self) -> usize {
        self.np - 3 * self.order
    }

    /// Classify volume node `n`: vertex, edge interior, or element interior.
    pub fn node_kind(&self, n: usize) -> NodeKind {
        if let Some(v) = self.vertex_nodes.iter().position(|&vn| vn == n) {
            return NodeKind::Vertex(v);
        }
        for (f, nodes) in self.face_nodes.iter().enumerate() {
            if let Some(k) = nodes.iter().position(|&fn_| fn_ == n) {
                return NodeKind::Edge { face: f, position: k };
            }
        }
        NodeKind::Interior
    }
}

/// Where a volume node sits on the reference triangle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Vertex(usize),
    /// `position` counts along the face from its first vertex (`1..N`).
    Edge { face: usize, position: usize },
    Interior,
}

fn find_face_nodes(r: &[f64], s: &[f64], nfp: usize) -> Result<[Vec<usize>; NFACES], MeshError> {
    // (on-face predicate, parameter increasing from the face's first vertex)
    let select = |on: &dyn Fn(usize) -> bool, param: &dyn Fn(usize) -> f64| {
        let mut ids: Vec<usize> = (0..r.len()).filter(|&i| on(i)).collect();
        ids.sort_by(|&a, &b| param(a).total_cmp(&param(b)));
        ids
    };
    let faces = [
        select(&|i| (s[i] + 1.0).abs() < NODETOL, &|i| r[i]),
        select(&|i| (r[i] + s[i]).abs() < NODETOL, &|i| s[i]),
        select(&|i| (r[i] + 1.0).abs() < NODETOL, &|i| -s[i]),
    ];
    for (f, nodes) in faces.iter().enumerate() {
        if nodes.len() != nfp {
            return Err(MeshError::InvalidReference(format!(
                "face {f} has {} nodes, expected {nfp}",
                nodes.len()
            )));
        }
    }
    Ok(faces)
}

// ===== 1D orthogonal polynomials ==========================================

/// `Gamma(x)` for positive integer `x`; the Jacobi weights used here are
/// always integers.
fn gamma_int(x: f64) -> f64 {
    let n = x.round() as u64;
    (1..n).map(|k| k as f64).product()
}

/// Normalised Jacobi polynomial `P_n^{(alpha, beta)}` evaluated at `x`.
pub fn jacobi_p(x: &[f64], alpha: f64, beta: f64, n: usize) -> Vec<f64> {
    let ab = alpha + beta;
    let gamma0 = 2f64.powf(ab + 1.0) / (ab + 1.0) * gamma_int(alpha + 1.0)
        * gamma_int(beta + 1.0)
        / gamma_int(ab + 1.0);
    let p0: Vec<f64> = vec![1.0 / gamma0.sqrt(); x.len()];
    if n == 0 {
        return p0;
    }
    let gamma1 = (alpha + 1.0) * (beta + 1.0) / (ab + 3.0) * gamma0;
    let p1: Vec<f64> = x
        .iter()
        .map(|&xi| ((ab + 2.0) * xi / 2.0 + (alpha - beta) / 2.0) / gamma1.sqrt())
        .collect();
    if n == 1 {
        return p1;
    }

    let mut aold = 2.0 / (2.0 + ab) * ((alpha + 1.0) * (beta + 1.0) / (ab + 3.0)).sqrt();
    let (mut prev, mut cur) = (p0, p1);
    for i in 1..n {
        let i = i as f64;
        let h1 = 2.0 * i + ab;
        let anew = 2.0 / (h1 + 2.0)
            * ((i + 1.0) * (i + 1.0 + ab) * (i + 1.0 + alpha) * (i + 1.0 + beta)
                / (h1 + 1.0)
                / (h1 + 3.0))
                .sqrt();
        let bnew = -(alpha * alpha - beta * beta) / h1 / (h1 + 2.0);
        let next: Vec<f64> = x
            .iter()
            .zip(prev.iter().zip(&cur))
            .map(|(&xi, (&pm, &pc))| (-aold * pm + (xi - bnew) * pc) / anew)
            .collect();
        prev = cur;
        cur = next;
        aold = anew;
    }
    cur
}

/// Derivative of [`jacobi_p`].
pub fn grad_jacobi_p(x: &[f64], alpha: f64, beta: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return vec![0.0; x.len()];
    }
    let scale = ((n as f64) * (n as f64 + alpha + beta + 1.0)).sqrt();
    jacobi_p(x, alpha + 1.0, beta + 1.0, n - 1)
        .into_iter()
        .map(|p| scale * p)
        .collect()
}

/// Gauss quadrature nodes of the Jacobi weight, via Golub-Welsch.
pub fn jacobi_gq(alpha: f64, beta: f64, n: usize) -> Vec<f64> {
    let ab = alpha + beta;
    if n == 0 {
        return vec![(beta - alpha) / (ab + 2.0)];
    }
    let h1: Vec<f64> = (0..=n).map(|i| 2.0 * i as f64 + ab).collect();
    let mut jac = DMatrix::<f64>::zeros(n + 1, n + 1);
    for i in 0..=n {
        jac[(i, i)] = if ab.abs() < 10.0 * f64::EPSILON {
            0.0
        } else {
            -(alpha * alpha - beta * beta) / (h1[i] + 2.0) / h1[i]
        };
    }
    for i in 1..=n {
        let fi = i as f64;
        let h = h1[i - 1];
        let off = 2.0 / (h + 2.0)
            * (fi * (fi + ab) * (fi + alpha) * (fi + beta) / (h + 1.0) / (h + 3.0)).sqrt();
        jac[(i - 1, i)] = off;
        jac[(i, i - 1)] = off;
    }
    let mut nodes: Vec<f64> = SymmetricEigen::new(jac).eigenvalues.iter().copied().collect();
    nodes.sort_by(f64::total_cmp);
    nodes
}

/// Gauss-Lobatto nodes of the Jacobi weight, endpoints included.
pub fn jacobi_gl(alpha: f64, beta: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![-1.0, 1.0];
    }
    let mut x = Vec::with_capacity(n + 1);
    x.push(-1.0);
    x.extend(jacobi_gq(alpha + 1.0, beta + 1.0, n - 2));
    x.push(1.0);
    x
}

/// 1D Vandermonde: `V[(i, j)] = P_j(x_i)`.
pub fn vandermonde_1d(n: usize, x: &[f64]) -> DMatrix<f64> {
    let mut v = DMatrix::<f64>::zeros(x.len(), n + 1);
    for j in 0..=n {
        for (i, p) in jacobi_p(x, 0.0, 0.0, j).into_iter().enumerate() {
            v[(i, j)] = p;
        }
    }
    v
}

// ===== 2D simplex basis ===================================================

fn rs_to_ab(r: &[f64], s: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let a = r
        .iter()
        .zip(s)
        .map(|(&ri, &si)| {
            if (si - 1.0).abs() > NODETOL {
                2.0 * (1.0 + ri) / (1.0 - si) - 1.0
            } else {
                -1.0
            }
        })
        .collect();
    (a, s.to_vec())
}

fn simplex_2d_p(a: &[f64], b: &[f64], i: usize, j: usize) -> Vec<f64> {
    let h1 = jacobi_p(a, 0.0, 0.0, i);
    let h2 = jacobi_p(b, 2.0 * i as f64 + 1.0, 0.0, j);
    h1.iter()
        .zip(&h2)
        .zip(b)
        .map(|((&p, &q), &bi)| std::f64::consts::SQRT_2 * p * q * (1.0 - bi).powi(i as i32))
        .collect()
}

fn grad_simplex_2d_p(a: &[f64], b: &[f64], id: usize, jd: usize) -> (Vec<f64>, Vec<f64>) {
    let alpha_b = 2.0 * id as f64 + 1.0;
    let fa = jacobi_p(a, 0.0, 0.0, id);
    let dfa = grad_jacobi_p(a, 0.0, 0.0, id);
    let gb = jacobi_p(b, alpha_b, 0.0, jd);
    let dgb = grad_jacobi_p(b, alpha_b, 0.0, jd);
    let scale = 2f64.powf(id as f64 + 0.5);

    let mut dr = Vec::with_capacity(a.len());
    let mut ds = Vec::with_capacity(a.len());
    for k in 0..a.len() {
        let half_1mb = 0.5 * (1.0 - b[k]);
        let pow_m1 = if id > 0 { half_1mb.powi(id as i32 - 1) } else { 1.0 };
        let mut dmdr = dfa[k] * gb[k];
        let mut dmds = dfa[k] * gb[k] * 0.5 * (1.0 + a[k]);
        if id > 0 {
            dmdr *= pow_m1;
            dmds *= pow_m1;
        }
        let mut tmp = dgb[k] * half_1mb.powi(id as i32);
        if id > 0 {
            tmp -= 0.5 * id as f64 * gb[k] * pow_m1;
        }
        dmds += fa[k] * tmp;
        dr.push(scale * dmdr);
        ds.push(scale * dmds);
    }
    (dr, ds)
}

fn vandermonde_2d(n: usize, r: &[f64], s: &[f64]) -> DMatrix<f64> {
    let (a, b) = rs_to_ab(r, s);
    let np = (n + 1) * (n + 2) / 2;
    let mut v = DMatrix::<f64>::zeros(r.len(), np);
    let mut col = 0;
    for i in 0..=n {
        for j in 0..=(n - i) {
            for (row, p) in simplex_2d_p(&a, &b, i, j).into_iter().enumerate() {
                v[(row, col)] = p;
            }
            col += 1;
        }
    }
    v
}

fn grad_vandermonde_2d(n: usize, r: &[f64], s: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
    let (a, b) = rs_to_ab(r, s);
    let np = (n + 1) * (n + 2) / 2;
    let mut vr = DMatrix::<f64>::zeros(r.len(), np);
    let mut vs = DMatrix::<f64>::zeros(r.len(), np);
    let mut col = 0;
    for i in 0..=n {
        for j in 0..=(n - i) {
            let (dr, ds) = grad_simplex_2d_p(&a, &b, i, j);
            for row in 0..r.len() {
                vr[(row, col)] = dr[row];
                vs[(row, col)] = ds[row];
            }
            col += 1;
        }
    }
    (vr, vs)
}

// ===== warp & blend nodes =================================================

/// Edge warp evaluated at `rout`, vanishing at the edge ends.
fn warp_factor(n: usize, rout: &[f64]) -> Result<Vec<f64>, MeshError> {
    let lgl = jacobi_gl(0.0, 0.0, n);
    let req: Vec<f64> = (0..=n)
        .map(|i| -1.0 + 2.0 * i as f64 / n as f64)
        .collect();
    let veq = vandermonde_1d(n, &req);
    let shift = DVector::from_iterator(n + 1, lgl.iter().zip(&req).map(|(g, e)| g - e));
    let coeff = veq
        .lu()
        .solve(&shift)
        .ok_or_else(|| MeshError::InvalidReference(format!("singular warp system, N={n}")))?;
    let pout = vandermonde_1d(n, rout);
    let warp = pout * coeff;

    Ok(rout
        .iter()
        .zip(warp.iter())
        .map(|(&x, &w)| {
            if x.abs() < 1.0 - 1e-10 {
                w / (1.0 - x * x)
            } else {
                0.0
            }
        })
        .collect())
}

fn warp_blend_nodes(n: usize) -> Result<(Vec<f64>, Vec<f64>), MeshError> {
    let alpha = ALPHA_OPT.get(n - 1).copied().unwrap_or(5.0 / 3.0);
    let np = (n + 1) * (n + 2) / 2;
    let nf = n as f64;

    let mut l1 = Vec::with_capacity(np);
    let mut l2 = Vec::with_capacity(np);
    let mut l3 = Vec::with_capacity(np);
    for i in 0..=n {
        for j in 0..=(n - i) {
            let a = i as f64 / nf;
            let c = j as f64 / nf;
            l1.push(a);
            l3.push(c);
            l2.push(1.0 - a - c);
        }
    }

    let sqrt3 = 3f64.sqrt();
    let d1: Vec<f64> = (0..np).map(|k| l3[k] - l2[k]).collect();
    let d2: Vec<f64> = (0..np).map(|k| l1[k] - l3[k]).collect();
    let d3: Vec<f64> = (0..np).map(|k| l2[k] - l1[k]).collect();
    let w1 = warp_factor(n, &d1)?;
    let w2 = warp_factor(n, &d2)?;
    let w3 = warp_factor(n, &d3)?;

    let (c2, s2) = ((2.0 * std::f64::consts::PI / 3.0).cos(), (2.0 * std::f64::consts::PI / 3.0).sin());
    let (c3, s3) = ((4.0 * std::f64::consts::PI / 3.0).cos(), (4.0 * std::f64::consts::PI / 3.0).sin());

    let mut r = Vec::with_capacity(np);
    let mut s = Vec::with_capacity(np);
    for k in 0..np {
        let warp1 = 4.0 * l2[k] * l3[k] * w1[k] * (1.0 + (alpha * l1[k]).powi(2));
        let warp2 = 4.0 * l1[k] * l3[k] * w2[k] * (1.0 + (alpha * l2[k]).powi(2));
        let warp3 = 4.0 * l1[k] * l2[k] * w3[k] * (1.0 + (alpha * l3[k]).powi(2));
        let x = -l2[k] + l3[k] + warp1 + c2 * warp2 + c3 * warp3;
        let y = (-l2[k] - l3[k] + 2.0 * l1[k]) / sqrt3 + s2 * warp2 + s3 * warp3;

        // equilateral (x, y) -> reference (r, s)
        let b1 = (sqrt3 * y + 1.0) / 3.0;
        let b2 = (-3.0 * x - sqrt3 * y + 2.0) / 6.0;
        let b3 = (3.0 * x - sqrt3 * y + 2.0) / 6.0;
        r.push(-b2 + b3 - b1);
        s.push(-b2 - b3 + b1);
    }
    Ok((r, s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn order_zero_is_rejected() {
        assert!(matches!(
            ReferenceTriangle::new(0),
            Err(MeshError::InvalidReference(_))
        ));
    }

    #[test]
    fn linear_element_nodes_are_the_vertices() {
        let refel = ReferenceTriangle::new(1).unwrap();
        assert_eq!(refel.np, 3);
        let expected = [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0)];
        for (k, &(r, s)) in expected.iter().enumerate() {
            assert_relative_eq!(refel.r[k], r, epsilon = 1e-12);
            assert_relative_eq!(refel.s[k], s, epsilon = 1e-12);
        }
        assert_eq!(refel.face_nodes[0], vec![0, 1]);
        assert_eq!(refel.face_nodes[1], vec![1, 2]);
        assert_eq!(refel.face_nodes[2], vec![2, 0]);
    }

    #[test]
    fn jacobi_polynomials_are_orthonormal() {
        // weight (1 - x)^2 on [-1, 1] integrates to 8/3
        assert_relative_eq!(jacobi_p(&[0.3], 2.0, 0.0, 0)[0], (3.0f64 / 8.0).sqrt());
        // Gauss-Legendre weights from the standard P_6, exact to degree 11
        let x = jacobi_gq(0.0, 0.0, 5);
        let p5 = jacobi_p(&x, 0.0, 0.0, 5);
        let p2 = jacobi_p(&x, 0.0, 0.0, 2);
        let w: Vec<f64> = x
            .iter()
            .map(|&xi| {
                let d = grad_jacobi_p(&[xi], 0.0, 0.0, 6)[0] / 6.5f64.sqrt();
                2.0 / ((1.0 - xi * xi) * d * d)
            })
            .collect();
        let inner = |a: &[f64], b: &[f64]| -> f64 {
            a.iter().zip(b).zip(&w).map(|((p, q), wi)| p * q * wi).sum()
        };
        assert_relative_eq!(inner(&p5, &p5), 1.0, epsilon = 1e-10);
        assert_relative_eq!(inner(&p5, &p2), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn mass_integrates_the_area() {
        for n in 1..=5 {
            let refel = ReferenceTriangle::new(n).unwrap();
            assert_relative_eq!(refel.mm.sum(), 2.0, epsilon = 1e-10);
            assert_relative_eq!(refel.face_mass.sum(), 2.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn derivatives_are_exact_on_linears() {
        let refel = ReferenceTriangle::new(4).unwrap();
        let r = DVector::from_vec(refel.r.clone());
        let s = DVector::from_vec(refel.s.clone());
        for v in (&refel.dr * &r).iter() {
            assert_relative_eq!(*v, 1.0, epsilon = 1e-9);
        }
        for v in (&refel.ds * &s).iter() {
            assert_relative_eq!(*v, 1.0, epsilon = 1e-9);
        }
        for v in (&refel.dr * &s).iter() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn stiffness_is_symmetric_and_annihilates_constants() {
        let refel = ReferenceTriangle::new(3).unwrap();
        assert_relative_eq!(refel.srr, refel.srr.transpose(), epsilon = 1e-10);
        assert_relative_eq!(refel.srs, refel.ssr.transpose(), epsilon = 1e-10);
        let ones = DVector::from_element(refel.np, 1.0);
        for v in (&refel.srr * &ones).iter() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn face_nodes_follow_the_gll_parameter() {
        let refel = ReferenceTriangle::new(5).unwrap();
        for (i, &vid) in refel.face_nodes[0].iter().enumerate() {
            assert_relative_eq!(refel.r[vid], refel.face_gll[i], epsilon = 1e-10);
        }
        for (i, &vid) in refel.face_nodes[2].iter().enumerate() {
            assert_relative_eq!(-refel.s[vid], refel.face_gll[i], epsilon = 1e-10);
        }
        assert_eq!(refel.n_interior(), 6);
        assert_eq!(refel.node_kind(0), NodeKind::Vertex(0));
        assert_eq!(
            refel.node_kind(refel.face_nodes[1][2]),
            NodeKind::Edge { face: 1, position: 2 }
        );
    }

    #[test]
    fn lift_of_face_mass_weights() {
        // MM * LIFT recovers the three face mass blocks, each summing to 2
        let refel = ReferenceTriangle::new(2).unwrap();
        let ones = DVector::from_element(3 * refel.nfp, 1.0);
        let lifted = &refel.mm * (&refel.lift * ones);
        assert_relative_eq!(lifted.sum(), 6.0, epsilon = 1e-9);
    }
}
