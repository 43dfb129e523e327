//! Global DOF numbering.
//!
//! Two algorithms are provided:
//!
//! * **per-rank unique**: every local DOF gets `local_index + rank_offset`,
//!   with the offsets from an exclusive scan of the local counts;
//! * **consecutive** ("squeezed"): DOFs carry rank-independent candidate ids,
//!   and all DOFs sharing a candidate, on any rank, receive the same dense id
//!   in `[0, n_global)`.
//!
//! The consecutive path needs no coordinator. Requests are routed to the
//! rendezvous rank `candidate % size`, which elects the lowest touching rank as
//! owner. Per-owner counts are then all-gathered so every owner's ids form one
//! contiguous block `[global_starts[r], global_starts[r + 1])`.

use serde::{Deserialize, Serialize};

use crate::algs::collectives::{all_to_all_v, bucket_by_rank, exclusive_scan};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::halo::HaloPattern;
use crate::algs::wire::{WireAssignment, WireCandidate};
use crate::discretization::reference::{FACE_VERTICES, NodeKind, ReferenceTriangle};
use crate::mesh_error::MeshError;
use crate::topology::mesh::TriMesh;

/// Numbering algorithm selector.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum NumberingMode {
    /// Every local DOF is its own unknown (DG).
    #[default]
    DofUnique,
    /// DOFs at the same physical point share one id (continuous projection).
    Matching,
}

/// Tags used by [`GlobalNumbering::consecutive`].
#[derive(Copy, Clone, Debug)]
pub struct NumberingCommTags {
    pub requests: CommTag,
    pub replies: CommTag,
}

impl NumberingCommTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            requests: base,
            replies: base.offset(2),
        }
    }
}

impl Default for NumberingCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x0400))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalNumbering {
    pub global_ids: Vec<u64>,
    pub global_owners: Vec<usize>,
    /// `size + 1` entries; rank `r` owns `[global_starts[r], global_starts[r + 1])`.
    pub global_starts: Vec<u64>,
    pub mode: NumberingMode,
}

impl GlobalNumbering {
    /// Select the algorithm by `mode`. `DofUnique` only uses the length of
    /// `candidates`.
    pub fn build<C: Communicator>(
        comm: &C,
        candidates: &[u64],
        mode: NumberingMode,
    ) -> Result<Self, MeshError> {
        match mode {
            NumberingMode::DofUnique => Self::per_rank_unique(comm, candidates.len()),
            NumberingMode::Matching => Self::consecutive(comm, candidates),
        }
    }

    pub fn per_rank_unique<C: Communicator>(comm: &C, n_local: usize) -> Result<Self, MeshError> {
        let me = comm.rank();
        let global_starts = exclusive_scan(comm, n_local as u64)?;
        let offset = global_starts[me];
        Ok(Self {
            global_ids: (0..n_local as u64).map(|i| offset + i).collect(),
            global_owners: vec![me; n_local],
            global_starts,
            mode: NumberingMode::DofUnique,
        })
    }

    pub fn consecutive<C: Communicator>(comm: &C, candidates: &[u64]) -> Result<Self, MeshError> {
        Self::consecutive_with_tags(comm, candidates, NumberingCommTags::default())
    }

    pub fn consecutive_with_tags<C: Communicator>(
        comm: &C,
        candidates: &[u64],
        tags: NumberingCommTags,
    ) -> Result<Self, MeshError> {
        let me = comm.rank();
        let size = comm.size();

        // 1) send (candidate, origin, local) to the rendezvous rank
        let requests: Vec<(usize, WireCandidate)> = candidates
            .iter()
            .enumerate()
            .map(|(i, &c)| ((c % size as u64) as usize, WireCandidate::new(c, me, i)))
            .collect();
        let (send, request_counts) = bucket_by_rank(requests, size);
        let (mut binned, _) = all_to_all_v(comm, tags.requests, &send, &request_counts)?;

        // 2) elect owners; count distinct candidates per owner in this bin
        binned.sort_by_key(|w| (w.candidate(), w.origin(), w.local()));
        let mut bounds: Vec<usize> = (0..binned.len())
            .filter(|&i| i == 0 || binned[i - 1].candidate() != binned[i].candidate())
            .collect();
        bounds.push(binned.len());
        let mut bin_counts = vec![0u64; size];
        let mut elected: Vec<(usize, u64)> = Vec::with_capacity(bounds.len());
        for g in bounds.windows(2) {
            // lowest origin rank sorts first
            let owner = binned[g[0]].origin();
            elected.push((owner, bin_counts[owner]));
            bin_counts[owner] += 1;
        }

        // 3) all-gather the size x size (bin, owner) count matrix
        let mut all = vec![0u8; size * size * 8];
        let mine: Vec<u8> = bin_counts.iter().flat_map(|c| c.to_le_bytes()).collect();
        comm.allgather(&mine, &mut all)?;
        let counts: Vec<u64> = all
            .chunks_exact(8)
            .map(|b| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                u64::from_le_bytes(raw)
            })
            .collect();
        let at = |bin: usize, owner: usize| counts[bin * size + owner];
        let mut global_starts = vec![0u64; size + 1];
        for owner in 0..size {
            let total: u64 = (0..size).map(|b| at(b, owner)).sum();
            global_starts[owner + 1] = global_starts[owner] + total;
        }
        let base: Vec<u64> = (0..size)
            .map(|owner| global_starts[owner] + (0..me).map(|b| at(b, owner)).sum::<u64>())
            .collect();

        // 4) reply to every requester of every candidate
        let mut replies = Vec::with_capacity(binned.len());
        for (g, &(owner, position)) in bounds.windows(2).zip(&elected) {
            let id = base[owner] + position;
            for w in &binned[g[0]..g[1]] {
                replies.push((w.origin(), WireAssignment::new(w.local(), id, owner)));
            }
        }
        let (send, reply_counts) = bucket_by_rank(replies, size);
        let (assigned, received) = all_to_all_v(comm, tags.replies, &send, &reply_counts)?;

        // 5) every request must come back exactly once
        for (bin, (&asked, &got)) in request_counts.iter().zip(&received).enumerate() {
            if asked != got {
                return Err(MeshError::CountMismatch {
                    neighbor: bin,
                    expected: asked,
                    got,
                });
            }
        }
        let mut global_ids = vec![u64::MAX; candidates.len()];
        let mut global_owners = vec![usize::MAX; candidates.len()];
        for a in &assigned {
            let (local, id, owner) = a.decode();
            if local >= candidates.len() {
                return Err(MeshError::IndexOutOfBounds {
                    index: local,
                    len: candidates.len(),
                });
            }
            global_ids[local] = id;
            global_owners[local] = owner;
        }
        log::debug!(
            "rank {me}: squeezed {} candidates into {} global ids",
            candidates.len(),
            global_starts[size]
        );
        Ok(Self {
            global_ids,
            global_owners,
            global_starts,
            mode: NumberingMode::Matching,
        })
    }

    pub fn n_global(&self) -> u64 {
        self.global_starts.last().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.global_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global_ids.is_empty()
    }

    /// Extend ids and owners with the halo elements' values, obtained by a
    /// halo exchange of `width` DOFs per element. The numbering must cover
    /// exactly `n_elements * width` local DOFs.
    pub fn halo_ids<C: Communicator>(
        &self,
        comm: &C,
        halo: &mut HaloPattern,
        width: usize,
    ) -> Result<(Vec<u64>, Vec<usize>), MeshError> {
        let n_halo = halo.n_halo() * width;
        let mut ids = self.global_ids.clone();
        ids.resize(ids.len() + n_halo, 0);
        halo.exchange(comm, &mut ids, width)?;

        let mut owners: Vec<u64> = self.global_owners.iter().map(|&o| o as u64).collect();
        owners.resize(owners.len() + n_halo, 0);
        halo.exchange(comm, &mut owners, width)?;
        Ok((ids, owners.into_iter().map(|o| o as usize).collect()))
    }
}

/// Rank-independent candidate ids of the nodal DOFs of `mesh`
/// (`n_elements * Np`, element-major).
///
/// Vertex nodes use the global vertex id. Edge-interior nodes use the edge's
/// sorted vertex pair and their position counted from the lower vertex.
/// Element-interior nodes use the global element id and node slot.
pub fn nodal_candidate_ids(mesh: &TriMesh, refel: &ReferenceTriangle) -> Result<Vec<u64>, MeshError> {
    let n = refel.order as u64;
    let nv = mesh.n_global_vertices;
    let overflow = || {
        MeshError::InvalidConnectivity(format!(
            "candidate ids overflow for {nv} vertices at order {n}"
        ))
    };
    let edge_base = nv;
    let interior_base = nv
        .checked_mul(nv)
        .and_then(|v| v.checked_mul(n.saturating_sub(1)))
        .and_then(|v| v.checked_add(edge_base))
        .ok_or_else(overflow)?;
    let n_interior = refel.n_interior() as u64;
    // the largest interior id has to fit as well
    let _ = interior_base
        .checked_add(mesh.n_global_elements.checked_mul(n_interior).ok_or_else(overflow)?)
        .ok_or_else(overflow)?;

    let kinds: Vec<NodeKind> = (0..refel.np).map(|k| refel.node_kind(k)).collect();
    let mut ids = Vec::with_capacity(mesh.n_elements * refel.np);
    for e in 0..mesh.n_elements {
        let mut interior = 0u64;
        for kind in &kinds {
            let id = match *kind {
                NodeKind::Vertex(v) => mesh.etov[e][v],
                NodeKind::Edge { face, position } => {
                    let [a, b] = FACE_VERTICES[face];
                    let (va, vb) = (mesh.etov[e][a], mesh.etov[e][b]);
                    let k = if va < vb { position as u64 } else { n - position as u64 };
                    edge_base + (va.min(vb) * nv + va.max(vb)) * (n - 1) + (k - 1)
                }
                NodeKind::Interior => {
                    interior += 1;
                    interior_base + mesh.global_element_id(e) * n_interior + interior - 1
                }
            };
            ids.push(id);
        }
    }
    Ok(ids)
}
