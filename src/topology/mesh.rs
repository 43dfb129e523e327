//! Per-rank triangle mesh partition.
//!
//! A [`TriMesh`] holds the elements owned by one rank. Vertices are addressed by
//! their *global* ids so that faces can be matched across ranks without any
//! renumbering. Face adjacency (`etoe`, `etof`, `etop`) starts empty and is
//! filled in by [`connect`](crate::topology::connect::connect); after that the
//! partition is immutable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::discretization::reference::{FACE_VERTICES, NFACES, NVERTS};
use crate::mesh_error::MeshError;

/// One face shared with an element on another rank.
///
/// Halo slot `k` (element index `n_elements + k`) holds the remote element of
/// `halo_pairs[k]`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct HaloPair {
    pub element: usize,
    pub face: usize,
    pub rank: usize,
    pub nbr_element: usize,
    pub nbr_face: usize,
}

impl HaloPair {
    /// Ordering key shared by both sides of the pair: neighbour rank, then the
    /// `(element, face)` seen from the lower-ranked side.
    pub(crate) fn order_key(&self, me: usize) -> (usize, usize, usize) {
        if me < self.rank {
            (self.rank, self.element, self.face)
        } else {
            (self.rank, self.nbr_element, self.nbr_face)
        }
    }
}

#[derive(Clone, Debug)]
pub struct TriMesh {
    pub rank: usize,
    pub n_elements: usize,
    /// Global id of local element 0; local elements are consecutive globally.
    pub element_offset: u64,
    pub n_global_vertices: u64,
    pub n_global_elements: u64,
    pub etov: Vec<[u64; NVERTS]>,
    pub ex: Vec<[f64; NVERTS]>,
    pub ey: Vec<[f64; NVERTS]>,
    /// Boundary tag per face, `0` on untagged faces.
    pub etob: Vec<[i32; NFACES]>,
    /// Neighbour element per face; `None` on a physical boundary, `>= n_elements`
    /// for a halo slot.
    pub etoe: Vec<[Option<usize>; NFACES]>,
    pub etof: Vec<[Option<usize>; NFACES]>,
    /// Rank owning the neighbour element.
    pub etop: Vec<[Option<usize>; NFACES]>,
    pub halo_pairs: Vec<HaloPair>,
}

impl TriMesh {
    /// Local partition from raw connectivity, not yet connected.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rank: usize,
        element_offset: u64,
        n_global_elements: u64,
        n_global_vertices: u64,
        etov: Vec<[u64; NVERTS]>,
        ex: Vec<[f64; NVERTS]>,
        ey: Vec<[f64; NVERTS]>,
        etob: Vec<[i32; NFACES]>,
    ) -> Result<Self, MeshError> {
        let n = etov.len();
        if ex.len() != n || ey.len() != n || etob.len() != n {
            return Err(MeshError::InvalidConnectivity(format!(
                "table lengths differ: etov {n}, ex {}, ey {}, etob {}",
                ex.len(),
                ey.len(),
                etob.len()
            )));
        }
        if let Some((e, v)) = etov
            .iter()
            .enumerate()
            .find_map(|(e, vs)| vs.iter().find(|&&v| v >= n_global_vertices).map(|&v| (e, v)))
        {
            return Err(MeshError::InvalidConnectivity(format!(
                "element {e} references vertex {v} of {n_global_vertices}"
            )));
        }
        if element_offset + n as u64 > n_global_elements {
            return Err(MeshError::InvalidConnectivity(format!(
                "elements {element_offset}..{} exceed global count {n_global_elements}",
                element_offset + n as u64
            )));
        }
        Ok(Self {
            rank,
            n_elements: n,
            element_offset,
            n_global_vertices,
            n_global_elements,
            etov,
            ex,
            ey,
            etob,
            etoe: vec![[None; NFACES]; n],
            etof: vec![[None; NFACES]; n],
            etop: vec![[None; NFACES]; n],
            halo_pairs: Vec::new(),
        })
    }

    pub fn n_halo(&self) -> usize {
        self.halo_pairs.len()
    }

    /// Sorted global vertex pair of face `f` of element `e`.
    pub fn face_key(&self, e: usize, f: usize) -> (u64, u64) {
        let [a, b] = FACE_VERTICES[f];
        let (va, vb) = (self.etov[e][a], self.etov[e][b]);
        (va.min(vb), va.max(vb))
    }

    pub fn global_element_id(&self, e: usize) -> u64 {
        self.element_offset + e as u64
    }

    /// Vertex -> incident local elements, as CSR over the sorted global
    /// vertex ids touched by this partition.
    pub fn vertex_to_elements(&self) -> VertexToElements {
        let mut pairs: Vec<(u64, usize)> = self
            .etov
            .iter()
            .enumerate()
            .flat_map(|(e, vs)| vs.iter().map(move |&v| (v, e)))
            .collect();
        pairs.sort_unstable();
        pairs.dedup();

        let mut vertices = Vec::new();
        let mut offsets = vec![0];
        let mut elements = Vec::with_capacity(pairs.len());
        for (v, e) in pairs {
            if vertices.last() != Some(&v) {
                if !vertices.is_empty() {
                    offsets.push(elements.len());
                }
                vertices.push(v);
            }
            elements.push(e);
        }
        offsets.push(elements.len());
        if vertices.is_empty() {
            offsets.truncate(1);
        }
        VertexToElements {
            vertices,
            offsets,
            elements,
        }
    }
}

/// CSR vertex -> element incidence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexToElements {
    pub vertices: Vec<u64>,
    pub offsets: Vec<usize>,
    pub elements: Vec<usize>,
}

impl VertexToElements {
    /// Local elements touching global vertex `v`.
    pub fn elements_of(&self, v: u64) -> &[usize] {
        match self.vertices.binary_search(&v) {
            Ok(i) => &self.elements[self.offsets[i]..self.offsets[i + 1]],
            Err(_) => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Whole-domain triangle mesh as delivered by a mesh reader.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GlobalTriMesh {
    pub vx: Vec<f64>,
    pub vy: Vec<f64>,
    /// Counter-clockwise vertex triples.
    pub etov: Vec<[u64; NVERTS]>,
    /// Tagged boundary faces, keyed by vertex pair in either order.
    pub boundary_faces: Vec<([u64; 2], i32)>,
}

impl GlobalTriMesh {
    /// Structured `nx x ny` rectangle on `[x0, x1] x [y0, y1]`, each cell split
    /// into two triangles. `tags` are the bottom, right, top and left side tags.
    pub fn rectangle(nx: usize, ny: usize, x: [f64; 2], y: [f64; 2], tags: [i32; 4]) -> Self {
        let vid = |i: usize, j: usize| (j * (nx + 1) + i) as u64;
        let mut mesh = GlobalTriMesh::default();
        for j in 0..=ny {
            for i in 0..=nx {
                mesh.vx.push(x[0] + (x[1] - x[0]) * i as f64 / nx as f64);
                mesh.vy.push(y[0] + (y[1] - y[0]) * j as f64 / ny as f64);
            }
        }
        for j in 0..ny {
            for i in 0..nx {
                let (a, b, c, d) = (vid(i, j), vid(i + 1, j), vid(i + 1, j + 1), vid(i, j + 1));
                mesh.etov.push([a, b, c]);
                mesh.etov.push([a, c, d]);
            }
        }
        for i in 0..nx {
            mesh.boundary_faces.push(([vid(i, 0), vid(i + 1, 0)], tags[0]));
            mesh.boundary_faces.push(([vid(i, ny), vid(i + 1, ny)], tags[2]));
        }
        for j in 0..ny {
            mesh.boundary_faces.push(([vid(nx, j), vid(nx, j + 1)], tags[1]));
            mesh.boundary_faces.push(([vid(0, j), vid(0, j + 1)], tags[3]));
        }
        mesh
    }

    pub fn n_elements(&self) -> usize {
        self.etov.len()
    }

    /// Contiguous block partition: rank `r` of `size` receives elements
    /// `[K r / size, K (r + 1) / size)`.
    pub fn partition(&self, rank: usize, size: usize) -> Result<TriMesh, MeshError> {
        if self.vx.len() != self.vy.len() {
            return Err(MeshError::InvalidConnectivity(format!(
                "vx has {} entries, vy {}",
                self.vx.len(),
                self.vy.len()
            )));
        }
        let k = self.etov.len();
        let start = k * rank / size;
        let end = k * (rank + 1) / size;
        let nv = self.vx.len() as u64;

        let tags: HashMap<(u64, u64), i32> = self
            .boundary_faces
            .iter()
            .map(|&([a, b], tag)| ((a.min(b), a.max(b)), tag))
            .collect();

        let etov: Vec<[u64; NVERTS]> = self.etov[start..end].to_vec();
        let mut ex = Vec::with_capacity(etov.len());
        let mut ey = Vec::with_capacity(etov.len());
        let mut etob = Vec::with_capacity(etov.len());
        for vs in &etov {
            if let Some(&v) = vs.iter().find(|&&v| v >= nv) {
                return Err(MeshError::InvalidConnectivity(format!(
                    "vertex {v} out of range ({nv} vertices)"
                )));
            }
            ex.push(vs.map(|v| self.vx[v as usize]));
            ey.push(vs.map(|v| self.vy[v as usize]));
            etob.push(std::array::from_fn(|f| {
                let [a, b] = FACE_VERTICES[f];
                let (va, vb) = (vs[a], vs[b]);
                tags.get(&(va.min(vb), va.max(vb))).copied().unwrap_or(0)
            }));
        }
        TriMesh::new(rank, start as u64, k as u64, nv, etov, ex, ey, etob)
    }
}
