//! Face node maps `vmapM` / `vmapP`.
//!
//! For every face node `(e, f, i)`, `vmap_m` is the volume index of the node on
//! `e` and `vmap_p` the volume index of the coincident node on the neighbour
//! (a halo element when the neighbour lives on another rank). Boundary faces
//! map to themselves. Volume indices address arrays laid out
//! `element * Np + node` over local and then halo elements.

use crate::discretization::reference::{FACE_VERTICES, NFACES, ReferenceTriangle};
use crate::mesh_error::MeshError;
use crate::topology::mesh::TriMesh;

/// Coincidence tolerance relative to the face length.
const NODE_TOL: f64 = 1e-8;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaceMaps {
    pub vmap_m: Vec<usize>,
    pub vmap_p: Vec<usize>,
}

impl FaceMaps {
    #[inline]
    pub fn index(e: usize, f: usize, i: usize, nfp: usize) -> usize {
        (e * NFACES + f) * nfp + i
    }
}

/// Match face nodes by physical coordinates.
///
/// `x` and `y` must cover `(n_elements + n_halo) * Np` nodes.
pub fn build_face_maps(
    mesh: &TriMesh,
    refel: &ReferenceTriangle,
    x: &[f64],
    y: &[f64],
) -> Result<FaceMaps, MeshError> {
    let np = refel.np;
    let nfp = refel.nfp;
    let needed = (mesh.n_elements + mesh.n_halo()) * np;
    if x.len() != needed || y.len() != needed {
        return Err(MeshError::BufferShape {
            expected: needed,
            got: x.len().min(y.len()),
        });
    }

    let total = mesh.n_elements * NFACES * nfp;
    let mut vmap_m = Vec::with_capacity(total);
    let mut vmap_p = Vec::with_capacity(total);
    for e in 0..mesh.n_elements {
        for f in 0..NFACES {
            let [a, b] = FACE_VERTICES[f];
            let len = (mesh.ex[e][a] - mesh.ex[e][b]).hypot(mesh.ey[e][a] - mesh.ey[e][b]);
            let tol = NODE_TOL * len.max(f64::MIN_POSITIVE);
            for (i, &n) in refel.face_nodes[f].iter().enumerate() {
                let id_m = e * np + n;
                vmap_m.push(id_m);
                let (Some(e_p), Some(f_p)) = (mesh.etoe[e][f], mesh.etof[e][f]) else {
                    vmap_p.push(id_m);
                    continue;
                };
                let best = refel.face_nodes[f_p]
                    .iter()
                    .map(|&m| {
                        let id_p = e_p * np + m;
                        let d = (x[id_p] - x[id_m]).hypot(y[id_p] - y[id_m]);
                        (d, id_p)
                    })
                    .min_by(|l, r| l.0.total_cmp(&r.0));
                match best {
                    Some((d, id_p)) if d <= tol => vmap_p.push(id_p),
                    _ => {
                        return Err(MeshError::UnmatchedFaceNode {
                            element: e,
                            face: f,
                            node: i,
                        });
                    }
                }
            }
        }
    }
    Ok(FaceMaps { vmap_m, vmap_p })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::geometry::metrics::physical_nodes;
    use crate::topology::connect::connect;
    use crate::topology::mesh::GlobalTriMesh;

    #[test]
    fn shared_face_nodes_meet_in_reverse_order() {
        let refel = ReferenceTriangle::new(3).unwrap();
        let g = GlobalTriMesh::rectangle(1, 1, [0.0, 1.0], [0.0, 1.0], [1; 4]);
        let mut mesh = g.partition(0, 1).unwrap();
        connect(&NoComm, &mut mesh).unwrap();
        let (mut x, mut y) = (Vec::new(), Vec::new());
        for e in 0..mesh.n_elements {
            let (xe, ye) = physical_nodes(&refel, &mesh.ex[e], &mesh.ey[e]);
            x.extend(xe);
            y.extend(ye);
        }
        let maps = build_face_maps(&mesh, &refel, &x, &y).unwrap();
        let nfp = refel.nfp;
        for i in 0..nfp {
            let idx = FaceMaps::index(0, 2, i, nfp);
            let p = maps.vmap_p[idx];
            assert_eq!(p / refel.np, 1);
            assert_eq!(p % refel.np, refel.face_nodes[0][nfp - 1 - i]);
        }
        // boundary face maps onto itself
        let idx = FaceMaps::index(0, 0, 1, nfp);
        assert_eq!(maps.vmap_p[idx], maps.vmap_m[idx]);
    }
}
