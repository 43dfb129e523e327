//! Distributed assembly of the symmetric interior-penalty (SIPG) operator for
//! `-Δu + λu`.
//!
//! Each rank builds, for every local element, a diagonal block (volume terms
//! plus the element's own face terms) and one off-diagonal block per interior
//! face coupling to the neighbour, optionally projects each block onto a
//! target basis, and emits the non-zero entries with the owner of their row.
//! Entries are then routed to their owners and merged.
//!
//! On a face with weight `c` (`1/2` inside, `1` on essential, `0` on natural
//! boundaries), penalty `p = tau * max(hinv⁻, hinv⁺)`, surface Jacobian `sJ`,
//! reference face mass `Mf` and normal derivative `Dn = nx Dx + ny Dy`:
//!
//! ```text
//! diag   +=  c p sJ Mf  -  c sJ Mf Dn⁻  -  c Dn⁻ᵀ sJ Mf
//! offdiag += -½ p sJ Mf  -  ½ sJ Mf Dn⁺  +  ½ Dn⁻ᵀ sJ Mf
//! ```
//!
//! where `Dn⁺` uses the neighbour's metric and this side's normal.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::gather_scatter::GatherScatter;
use crate::algs::numbering::{
    GlobalNumbering, NumberingCommTags, NumberingMode, nodal_candidate_ids,
};
use crate::algs::par::try_map_elements;
use crate::data::dense::DenseBlock;
use crate::data::sparse::{DistributedMatrix, NonZero, add_non_zero};
use crate::discretization::dg_mesh::DgMesh;
use crate::discretization::reference::{NFACES, ReferenceTriangle};
use crate::geometry::metrics::VolumeFactors;
use crate::mesh_error::MeshError;
use crate::topology::boundary::{BoundaryType, BoundaryTypeMap};
use crate::topology::face_nodes::FaceMaps;

/// Communication tags for the assembly phases.
#[derive(Copy, Clone, Debug)]
pub struct AssemblyCommTags {
    pub numbering: NumberingCommTags,
    pub matrix: CommTag,
    pub gather_scatter: CommTag,
}

impl AssemblyCommTags {
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            numbering: NumberingCommTags::from_base(base),
            matrix: base.offset(4),
            gather_scatter: base.offset(6),
        }
    }
}

impl Default for AssemblyCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x0600))
    }
}

/// Interior-penalty scaling.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyParams {
    /// Penalty constant; `None` selects `(N + 1)(N + 2)`.
    pub tau: Option<f64>,
}

impl PenaltyParams {
    pub fn tau_for(&self, order: usize) -> f64 {
        self.tau.unwrap_or(((order + 1) * (order + 2)) as f64)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyOptions {
    pub mode: NumberingMode,
    /// Coefficient of the mass term.
    pub lambda: f64,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            mode: NumberingMode::DofUnique,
            lambda: 0.0,
        }
    }
}

/// The assembled operator with the numbering of its rows and columns.
#[derive(Clone, Debug)]
pub struct IpdgOperator {
    pub matrix: DistributedMatrix,
    pub numbering: GlobalNumbering,
    /// Present in [`NumberingMode::Matching`], for reducing vectors over
    /// coincident DOFs.
    pub gather_scatter: Option<GatherScatter>,
}

/// Assemble the IPDG operator of `dg` in the target `basis`
/// (`Np x basis_np`, `None` for the nodal basis).
///
/// Collective over `comm`.
pub fn build_ipdg_operator<C: Communicator>(
    comm: &C,
    dg: &mut DgMesh,
    basis: Option<&DMatrix<f64>>,
    boundary: &BoundaryTypeMap,
    penalty: PenaltyParams,
    options: AssemblyOptions,
) -> Result<IpdgOperator, MeshError> {
    build_ipdg_operator_with_tags(
        comm,
        dg,
        basis,
        boundary,
        penalty,
        options,
        AssemblyCommTags::default(),
    )
}

pub fn build_ipdg_operator_with_tags<C: Communicator>(
    comm: &C,
    dg: &mut DgMesh,
    basis: Option<&DMatrix<f64>>,
    boundary: &BoundaryTypeMap,
    penalty: PenaltyParams,
    options: AssemblyOptions,
    tags: AssemblyCommTags,
) -> Result<IpdgOperator, MeshError> {
    let np = dg.np();
    let k = dg.n_elements();
    let basis_np = match basis {
        Some(b) if b.nrows() != np => {
            return Err(MeshError::BufferShape {
                expected: np,
                got: b.nrows(),
            });
        }
        Some(b) => b.ncols(),
        None => np,
    };

    let mut mode = options.mode;
    if mode == NumberingMode::Matching && basis_np != np {
        log::warn!(
            "matching numbering needs the nodal basis ({np} modes, got {basis_np}); using unique numbering"
        );
        mode = NumberingMode::DofUnique;
    }
    let numbering = match mode {
        NumberingMode::DofUnique => GlobalNumbering::per_rank_unique(comm, k * basis_np)?,
        NumberingMode::Matching => {
            let candidates = nodal_candidate_ids(&dg.mesh, &dg.refel)?;
            GlobalNumbering::consecutive_with_tags(comm, &candidates, tags.numbering)?
        }
    };
    let (ids, owners) = numbering.halo_ids(comm, &mut dg.halo, basis_np)?;

    let face_types =
        boundary.resolve_tags(dg.mesh.etob.iter().flat_map(|faces| faces.iter().copied()));
    let tau = penalty.tau_for(dg.refel.order);
    let dg = &*dg;

    let per_element = try_map_elements(k, |e| {
        let (diag, offdiag) = element_blocks(dg, e, tau, options.lambda, &face_types)?;
        let mut out = Vec::new();
        emit(&mut out, &diag, basis, &ids, &owners, e, e, basis_np)?;
        for (ep, block) in &offdiag {
            emit(&mut out, block, basis, &ids, &owners, e, *ep, basis_np)?;
        }
        Ok::<_, MeshError>(out)
    })?;
    let contributions: Vec<NonZero> = per_element.into_iter().flatten().collect();

    let matrix = DistributedMatrix::assemble(
        comm,
        tags.matrix,
        numbering.global_starts.clone(),
        contributions,
    )?;
    let gather_scatter = match mode {
        NumberingMode::Matching => Some(GatherScatter::with_tag(
            comm,
            &numbering.global_ids,
            &numbering.global_owners,
            tags.gather_scatter,
        )?),
        NumberingMode::DofUnique => None,
    };
    log::info!(
        "rank {}: IPDG operator with {} global unknowns, {} local non-zeros",
        comm.rank(),
        numbering.n_global(),
        matrix.nnz()
    );
    Ok(IpdgOperator {
        matrix,
        numbering,
        gather_scatter,
    })
}

/// `nx Dx + ny Dy` for the metric `v`.
fn normal_derivative(refel: &ReferenceTriangle, v: &VolumeFactors, nx: f64, ny: f64) -> DMatrix<f64> {
    &refel.dr * (nx * v.rx + ny * v.ry) + &refel.ds * (nx * v.sx + ny * v.sy)
}

/// Nodal diagonal block of element `e` and its off-diagonal blocks, keyed
/// by neighbour element (local or halo index).
fn element_blocks(
    dg: &DgMesh,
    e: usize,
    tau: f64,
    lambda: f64,
    face_types: &BTreeMap<i32, BoundaryType>,
) -> Result<(DenseBlock, Vec<(usize, DenseBlock)>), MeshError> {
    let refel = &dg.refel;
    let (np, nfp) = (refel.np, refel.nfp);
    let v = &dg.vgeo[e];
    let g = &dg.ggeo[e];
    let mf = &refel.face_mass;

    let mut diag = DenseBlock::zeros(np);
    diag.add_scaled(v.j * lambda, &refel.mm)?;
    diag.add_scaled(g.g00, &refel.srr)?;
    diag.add_scaled(g.g01, &refel.srs)?;
    diag.add_scaled(g.g01, &refel.ssr)?;
    diag.add_scaled(g.g11, &refel.sss)?;

    let mut offdiag = Vec::new();
    for f in 0..NFACES {
        let sf = &dg.sgeo[e][f];
        let sj = sf.sj;
        let pen = tau * sf.hinv;
        let nbr = dg.mesh.etoe[e][f];
        let c = match nbr {
            Some(_) => BoundaryType::None.face_weight(),
            None => face_types
                .get(&dg.mesh.etob[e][f])
                .copied()
                .unwrap_or(BoundaryType::Natural)
                .face_weight(),
        };
        let fm = &refel.face_nodes[f];
        let dn1 = normal_derivative(refel, v, sf.nx, sf.ny);

        if c != 0.0 {
            for n in 0..nfp {
                for m in 0..nfp {
                    diag.add(fm[n], fm[m], c * pen * sj * mf[(n, m)])?;
                }
                for m in 0..np {
                    let t: f64 = (0..nfp).map(|i| mf[(n, i)] * dn1[(fm[i], m)]).sum();
                    diag.add(fm[n], m, -c * sj * t)?;
                    diag.add(m, fm[n], -c * sj * t)?;
                }
            }
        }

        let Some(ep) = nbr else { continue };
        let dn2 = normal_derivative(refel, &dg.vgeo[ep], sf.nx, sf.ny);
        let nbr_node: Vec<usize> = (0..nfp)
            .map(|i| dg.maps.vmap_p[FaceMaps::index(e, f, i, nfp)] % np)
            .collect();
        let mut block = DenseBlock::zeros(np);
        for n in 0..nfp {
            for m in 0..nfp {
                block.add(fm[n], nbr_node[m], -0.5 * pen * sj * mf[(n, m)])?;
            }
            for m in 0..np {
                let t: f64 = (0..nfp).map(|i| mf[(n, i)] * dn2[(nbr_node[i], m)]).sum();
                block.add(fm[n], m, -0.5 * sj * t)?;
                let t: f64 = (0..nfp).map(|i| dn1[(fm[i], m)] * mf[(i, n)]).sum();
                block.add(m, nbr_node[n], 0.5 * sj * t)?;
            }
        }
        offdiag.push((ep, block));
    }
    Ok((diag, offdiag))
}

/// Project `block` (rows of element `e`, columns of element `ep`) and push
/// its non-zeros.
#[allow(clippy::too_many_arguments)]
fn emit(
    out: &mut Vec<NonZero>,
    block: &DenseBlock,
    basis: Option<&DMatrix<f64>>,
    ids: &[u64],
    owners: &[usize],
    e: usize,
    ep: usize,
    basis_np: usize,
) -> Result<(), MeshError> {
    let projected;
    let block = match basis {
        Some(b) => {
            projected = block.project(b)?;
            &projected
        }
        None => block,
    };
    for (a, b, val) in block.iter() {
        let row = e * basis_np + a;
        let col = ep * basis_np + b;
        let (&row_id, &owner) = ids.get(row).zip(owners.get(row)).ok_or(
            MeshError::IndexOutOfBounds {
                index: row,
                len: ids.len(),
            },
        )?;
        let &col_id = ids.get(col).ok_or(MeshError::IndexOutOfBounds {
            index: col,
            len: ids.len(),
        })?;
        add_non_zero(out, row_id, col_id, owner, val);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::mesh::GlobalTriMesh;

    fn square(nx: usize, order: usize, tags: [i32; 4]) -> DgMesh {
        let g = GlobalTriMesh::rectangle(nx, nx, [0.0, 1.0], [0.0, 1.0], tags);
        DgMesh::setup(&NoComm, g.partition(0, 1).unwrap(), order, None).unwrap()
    }

    fn dense(op: &IpdgOperator) -> DMatrix<f64> {
        let n = op.numbering.n_global() as usize;
        let mut a = DMatrix::zeros(n, n);
        for nz in op.matrix.iter() {
            a[(nz.row as usize, nz.col as usize)] = nz.val;
        }
        a
    }

    #[test]
    fn operator_is_symmetric() {
        let mut dg = square(1, 2, [1; 4]);
        let bc = BoundaryTypeMap::new().with(1, 1);
        let op = build_ipdg_operator(
            &NoComm,
            &mut dg,
            None,
            &bc,
            PenaltyParams { tau: Some(60.0) },
            AssemblyOptions { lambda: 1.0, ..Default::default() },
        )
        .unwrap();
        assert_eq!(op.numbering.n_global(), 12);
        assert!(op.gather_scatter.is_none());
        let a = dense(&op);
        let asym = (&a - a.transpose()).amax();
        assert!(asym < 1e-10, "asymmetry {asym}");
        // Dirichlet on every side with positive lambda is definite
        assert!(a.symmetric_eigenvalues().min() > 0.0);
    }

    #[test]
    fn pure_neumann_annihilates_constants() {
        let mut dg = square(2, 3, [2; 4]);
        let bc = BoundaryTypeMap::new().with(2, 2);
        let op = build_ipdg_operator(
            &NoComm,
            &mut dg,
            None,
            &bc,
            PenaltyParams::default(),
            AssemblyOptions::default(),
        )
        .unwrap();
        let a = dense(&op);
        let ones = nalgebra::DVector::from_element(a.ncols(), 1.0);
        assert!((&a * ones).amax() < 1e-9);
    }

    #[test]
    fn mass_term_integrates_the_area() {
        let mut dg = square(2, 2, [2; 4]);
        let op = build_ipdg_operator(
            &NoComm,
            &mut dg,
            None,
            &BoundaryTypeMap::new().with(2, 2),
            PenaltyParams::default(),
            AssemblyOptions { lambda: 1.0, ..Default::default() },
        )
        .unwrap();
        let total: f64 = op.matrix.iter().map(|nz| nz.val).sum();
        assert!((total - 1.0).abs() < 1e-10, "1^T A 1 = {total}");
    }

    #[test]
    fn projected_operator_shrinks() {
        let mut dg = square(1, 2, [1; 4]);
        let basis = DMatrix::from_element(dg.np(), 1, 1.0);
        let op = build_ipdg_operator(
            &NoComm,
            &mut dg,
            Some(&basis),
            &BoundaryTypeMap::new().with(1, 1),
            PenaltyParams { tau: Some(10.0) },
            AssemblyOptions {
                mode: NumberingMode::Matching,
                lambda: 0.0,
            },
        )
        .unwrap();
        // one mode per element, and the matching request fell back
        assert_eq!(op.numbering.mode, NumberingMode::DofUnique);
        assert_eq!(op.numbering.n_global(), 2);
        let a = dense(&op);
        assert!((a[(0, 1)] - a[(1, 0)]).abs() < 1e-10);
    }

    #[test]
    fn wrong_basis_shape_is_rejected() {
        let mut dg = square(1, 1, [1; 4]);
        let basis = DMatrix::zeros(dg.np() + 1, 2);
        let err = build_ipdg_operator(
            &NoComm,
            &mut dg,
            Some(&basis),
            &BoundaryTypeMap::new(),
            PenaltyParams::default(),
            AssemblyOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MeshError::BufferShape { .. }));
    }
}
