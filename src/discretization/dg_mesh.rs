//! Distributed DG mesh: a connected partition together with its reference
//! element, halo pattern, geometric factors and face node maps.
//!
//! Local arrays that need neighbour data (`vgeo`, `x`, `y`) cover local
//! elements followed by halo elements, so `vmap_p` and `etoe` can index them
//! directly whether the neighbour is local or remote.

use crate::algs::communicator::Communicator;
use crate::algs::halo::HaloPattern;
use crate::algs::par::{map_elements, try_map_elements};
use crate::discretization::reference::{NFACES, ReferenceTriangle};
use crate::geometry::curved::{CurvedBoundary, CurvedFactors, curve_element_nodes, curved_factors};
use crate::geometry::length::characteristic_lengths;
use crate::geometry::metrics::{
    SecondOrderFactors, SurfaceFactors, VolumeFactors, affine_factors, element_surface_factors,
    physical_nodes, second_order_factors, surface_factors,
};
use crate::mesh_error::MeshError;
use crate::topology::connect::connect;
use crate::topology::face_nodes::{FaceMaps, build_face_maps};
use crate::topology::mesh::TriMesh;

#[derive(Clone, Debug)]
pub struct DgMesh {
    pub mesh: TriMesh,
    pub refel: ReferenceTriangle,
    pub halo: HaloPattern,
    /// Affine volume factors, local then halo elements.
    pub vgeo: Vec<VolumeFactors>,
    pub ggeo: Vec<SecondOrderFactors>,
    /// Per local element and face; `hinv` is the larger of both sides, and on
    /// the boundary faces of curved elements the largest nodal value.
    pub sgeo: Vec<[SurfaceFactors; NFACES]>,
    /// Physical node coordinates, `element * Np + node`, local then halo.
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub maps: FaceMaps,
    /// Whether each local element has a face on the curved boundary.
    pub curved: Vec<bool>,
    /// Nodal factors of the curved elements, sorted by element.
    pub curved_geo: Vec<CurvedFactors>,
    /// Characteristic length (inradius) of each local element.
    pub hs: Vec<f64>,
}

impl DgMesh {
    /// Connect `mesh` across ranks and compute everything the DG operators
    /// need at nodal order `order`.
    ///
    /// Collective: every rank must call it with its own partition.
    pub fn setup<C: Communicator>(
        comm: &C,
        mut mesh: TriMesh,
        order: usize,
        curve: Option<&CurvedBoundary>,
    ) -> Result<Self, MeshError> {
        let refel = ReferenceTriangle::new(order)?;
        connect(comm, &mut mesh)?;
        let mut halo = HaloPattern::new(comm, &mesh)?;
        let k = mesh.n_elements;
        let n_halo = mesh.n_halo();
        let np = refel.np;

        let mut vgeo =
            try_map_elements(k, |e| affine_factors(e, &mesh.ex[e], &mesh.ey[e]))?;
        vgeo.resize(k + n_halo, VolumeFactors::default());
        halo.exchange(comm, &mut vgeo, 1)?;
        let ggeo = vgeo[..k].iter().map(second_order_factors).collect();

        let nodes = try_map_elements(k, |e| {
            let (mut xe, mut ye) = physical_nodes(&refel, &mesh.ex[e], &mesh.ey[e]);
            let mut factors = None;
            if let Some(curve) = curve {
                let is_curved = curve_element_nodes(
                    &refel,
                    &mesh.ex[e],
                    &mesh.ey[e],
                    &mesh.etob[e],
                    curve,
                    &mut xe,
                    &mut ye,
                )?;
                if is_curved {
                    factors = Some(curved_factors(e, &refel, &xe, &ye)?);
                }
            }
            Ok::<_, MeshError>((xe, ye, factors))
        })?;
        let mut x = Vec::with_capacity((k + n_halo) * np);
        let mut y = Vec::with_capacity((k + n_halo) * np);
        let mut curved = Vec::with_capacity(k);
        let mut curved_geo = Vec::new();
        for (xe, ye, factors) in nodes {
            x.extend(xe);
            y.extend(ye);
            curved.push(factors.is_some());
            curved_geo.extend(factors);
        }
        x.resize((k + n_halo) * np, 0.0);
        y.resize((k + n_halo) * np, 0.0);
        halo.exchange(comm, &mut x, np)?;
        halo.exchange(comm, &mut y, np)?;

        let maps = build_face_maps(&mesh, &refel, &x, &y)?;

        let mut sgeo = map_elements(k, |e| {
            let mut faces = element_surface_factors(&vgeo[e]);
            for (f, sf) in faces.iter_mut().enumerate() {
                if let (Some(ep), Some(fp)) = (mesh.etoe[e][f], mesh.etof[e][f]) {
                    sf.hinv = sf.hinv.max(surface_factors(&vgeo[ep], fp).hinv);
                }
            }
            faces
        });
        // interior faces keep the affine value so both sides agree
        for cf in &curved_geo {
            for (f, sf) in sgeo[cf.element].iter_mut().enumerate() {
                if mesh.etoe[cf.element][f].is_none() {
                    sf.hinv = sf.hinv.max(cf.max_hinv(f));
                }
            }
        }
        let hs = characteristic_lengths(&mesh);

        log::info!(
            "rank {}: DG mesh order {order}, {k} elements, {n_halo} halo, {} curved",
            comm.rank(),
            curved_geo.len()
        );
        Ok(Self {
            mesh,
            refel,
            halo,
            vgeo,
            ggeo,
            sgeo,
            x,
            y,
            maps,
            curved,
            curved_geo,
            hs,
        })
    }

    pub fn n_elements(&self) -> usize {
        self.mesh.n_elements
    }

    pub fn np(&self) -> usize {
        self.refel.np
    }

    /// Nodal factors of local element `e`, if it is curved.
    pub fn curved_factors(&self, e: usize) -> Option<&CurvedFactors> {
        self.curved_geo
            .binary_search_by_key(&e, |cf| cf.element)
            .ok()
            .map(|i| &self.curved_geo[i])
    }
}
