//! Parallel face matching.
//!
//! Every element face is keyed by its sorted global vertex pair and sent to
//! the rendezvous rank `va % size`. The rendezvous rank pairs faces with equal
//! keys and tells both sides who their neighbour is. Faces that find no
//! partner are physical boundary faces. No rank ever needs the whole mesh.

use itertools::Itertools;

use crate::algs::collectives::{all_to_all_v, bucket_by_rank};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{WireFace, WireFaceMatch};
use crate::discretization::reference::NFACES;
use crate::mesh_error::MeshError;
use crate::topology::mesh::{HaloPair, TriMesh};

/// Tags used by [`connect`]: faces on `base`, matches on `base + 2`.
#[derive(Copy, Clone, Debug)]
pub struct ConnectCommTags {
    pub faces: CommTag,
    pub matches: CommTag,
}

impl ConnectCommTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            faces: base,
            matches: base.offset(2),
        }
    }
}

impl Default for ConnectCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x0100))
    }
}

/// Fill `etoe`, `etof`, `etop` and the halo pair list of `mesh`.
///
/// Halo pairs are ordered by neighbour rank and then by the `(element, face)`
/// of the lower-ranked side, so both ranks enumerate a shared interface in the
/// same order. A face key seen more than twice is reported as
/// [`MeshError::NonManifoldFace`] after the exchange completes on every rank.
pub fn connect<C: Communicator>(comm: &C, mesh: &mut TriMesh) -> Result<(), MeshError> {
    connect_with_tags(comm, mesh, ConnectCommTags::default())
}

pub fn connect_with_tags<C: Communicator>(
    comm: &C,
    mesh: &mut TriMesh,
    tags: ConnectCommTags,
) -> Result<(), MeshError> {
    let me = comm.rank();
    let size = comm.size();

    // 1) route faces to rendezvous ranks
    let outgoing: Vec<(usize, WireFace)> = (0..mesh.n_elements)
        .flat_map(|e| (0..NFACES).map(move |f| (e, f)))
        .map(|(e, f)| {
            let (va, vb) = mesh.face_key(e, f);
            ((va % size as u64) as usize, WireFace::new(va, vb, me, e, f))
        })
        .collect();
    let (send, counts) = bucket_by_rank(outgoing, size);
    let (mut faces, _) = all_to_all_v(comm, tags.faces, &send, &counts)?;

    // 2) pair faces sharing a key
    faces.sort_by_key(|w| (w.key(), w.rank(), w.element(), w.face()));
    let mut first_err = None;
    let mut replies: Vec<(usize, WireFaceMatch)> = Vec::new();
    for (key, group) in &faces.iter().chunk_by(|w| w.key()) {
        let group: Vec<&WireFace> = group.collect();
        match group.as_slice() {
            [_] => {}
            [a, b] => {
                replies.push((a.rank(), WireFaceMatch::new(a.element(), a.face(), b)));
                replies.push((b.rank(), WireFaceMatch::new(b.element(), b.face(), a)));
            }
            _ => {
                first_err.get_or_insert(MeshError::NonManifoldFace {
                    va: key.0,
                    vb: key.1,
                });
            }
        }
    }

    // 3) return matches to the face owners
    let (send, counts) = bucket_by_rank(replies, size);
    let (matches, _) = all_to_all_v(comm, tags.matches, &send, &counts)?;
    if let Some(err) = first_err {
        return Err(err);
    }

    let mut remote = Vec::new();
    for m in &matches {
        let (e, f, nbr_rank, nbr_e, nbr_f) = m.decode();
        if e >= mesh.n_elements || f >= NFACES {
            return Err(MeshError::InvalidConnectivity(format!(
                "face match for unknown element {e} face {f}"
            )));
        }
        if nbr_rank == me {
            mesh.etoe[e][f] = Some(nbr_e);
            mesh.etof[e][f] = Some(nbr_f);
            mesh.etop[e][f] = Some(me);
        } else {
            remote.push(HaloPair {
                element: e,
                face: f,
                rank: nbr_rank,
                nbr_element: nbr_e,
                nbr_face: nbr_f,
            });
        }
    }

    // 4) halo slots in an order both sides agree on
    remote.sort_by_key(|p| p.order_key(me));
    for (slot, p) in remote.iter().enumerate() {
        mesh.etoe[p.element][p.face] = Some(mesh.n_elements + slot);
        mesh.etof[p.element][p.face] = Some(p.nbr_face);
        mesh.etop[p.element][p.face] = Some(p.rank);
    }
    log::debug!(
        "rank {me}: connected {} elements, {} halo faces",
        mesh.n_elements,
        remote.len()
    );
    mesh.halo_pairs = remote;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::mesh::GlobalTriMesh;

    #[test]
    fn serial_square_is_connected_through_the_diagonal() {
        let g = GlobalTriMesh::rectangle(1, 1, [0.0, 1.0], [0.0, 1.0], [1; 4]);
        let mut mesh = g.partition(0, 1).unwrap();
        connect(&NoComm, &mut mesh).unwrap();
        // diagonal (0, 3): face 2 of [0, 1, 3], face 0 of [0, 3, 2]
        assert_eq!(mesh.etoe[0][2], Some(1));
        assert_eq!(mesh.etof[0][2], Some(0));
        assert_eq!(mesh.etoe[1][0], Some(0));
        assert_eq!(mesh.etof[1][0], Some(2));
        assert_eq!(mesh.etoe[0][0], None);
        assert_eq!(mesh.n_halo(), 0);
    }

    #[test]
    fn three_elements_on_one_face_are_rejected() {
        let mut mesh = TriMesh::new(
            0,
            0,
            3,
            5,
            vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]],
            vec![[0.0; 3]; 3],
            vec![[0.0; 3]; 3],
            vec![[0; 3]; 3],
        )
        .unwrap();
        let err = connect(&NoComm, &mut mesh).unwrap_err();
        assert_eq!(err, MeshError::NonManifoldFace { va: 0, vb: 1 });
    }
}
