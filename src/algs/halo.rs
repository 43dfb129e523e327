//! Halo exchange of per-element data across rank boundaries.
//!
//! A [`HaloPattern`] is built once from a connected [`TriMesh`] and reused for
//! any per-element payload of `width` values of a `Pod` type. The wire payload
//! carries no indices: rank A packs the elements of its halo pairs with rank B
//! in the order fixed at construction, and rank B unpacks them into its halo
//! slots in the same order. That ordering is private to the pattern.
//!
//! Exchanges are split-phase. [`HaloPattern::exchange_start`] posts every
//! receive and then every send and returns a [`PendingHalo`] that mutably
//! borrows the pattern, so a second exchange on the same pattern cannot start
//! until the first one is finished.

use bytemuck::Pod;
use std::marker::PhantomData;

use crate::algs::collectives::exchange_counts;
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{cast_slice, decode_records};
use crate::mesh_error::MeshError;
use crate::topology::mesh::TriMesh;

#[derive(Clone, Debug)]
struct HaloNeighbour {
    rank: usize,
    /// Local elements packed for this neighbour, in wire order.
    send_elements: Vec<usize>,
    /// First halo slot filled from this neighbour.
    recv_offset: usize,
    recv_count: usize,
}

/// Immutable send/receive layout for one mesh partition.
#[derive(Clone, Debug)]
pub struct HaloPattern {
    n_elements: usize,
    n_halo: usize,
    tag: CommTag,
    neighbours: Vec<HaloNeighbour>,
}

impl HaloPattern {
    /// Build the pattern from the halo pairs of `mesh` and verify the per-rank
    /// counts against every neighbour.
    pub fn new<C: Communicator>(comm: &C, mesh: &TriMesh) -> Result<Self, MeshError> {
        Self::with_tag(comm, mesh, CommTag::new(0x0200))
    }

    pub fn with_tag<C: Communicator>(
        comm: &C,
        mesh: &TriMesh,
        tag: CommTag,
    ) -> Result<Self, MeshError> {
        let size = comm.size();
        let mut neighbours: Vec<HaloNeighbour> = Vec::new();
        for (slot, pair) in mesh.halo_pairs.iter().enumerate() {
            match neighbours.last_mut() {
                Some(nb) if nb.rank == pair.rank => {
                    nb.send_elements.push(pair.element);
                    nb.recv_count += 1;
                }
                _ => neighbours.push(HaloNeighbour {
                    rank: pair.rank,
                    send_elements: vec![pair.element],
                    recv_offset: slot,
                    recv_count: 1,
                }),
            }
        }

        let mut send_counts = vec![0usize; size];
        for nb in &neighbours {
            if nb.rank >= size {
                return Err(MeshError::InvalidConnectivity(format!(
                    "halo neighbour rank {} outside communicator of size {size}",
                    nb.rank
                )));
            }
            send_counts[nb.rank] = nb.send_elements.len();
        }
        let recv_counts = exchange_counts(comm, tag, &send_counts)?;
        for (r, (&sent, &announced)) in send_counts.iter().zip(&recv_counts).enumerate() {
            if r != comm.rank() && sent != announced {
                return Err(MeshError::CountMismatch {
                    neighbor: r,
                    expected: sent,
                    got: announced,
                });
            }
        }
        log::debug!(
            "rank {}: halo pattern with {} neighbours, {} halo elements",
            comm.rank(),
            neighbours.len(),
            mesh.n_halo()
        );
        Ok(Self {
            n_elements: mesh.n_elements,
            n_halo: mesh.n_halo(),
            tag: tag.offset(1),
            neighbours,
        })
    }

    pub fn n_halo(&self) -> usize {
        self.n_halo
    }

    pub fn n_neighbours(&self) -> usize {
        self.neighbours.len()
    }

    /// Post the exchange of `local` (`n_elements * width` values).
    pub fn exchange_start<'a, C, T>(
        &'a mut self,
        comm: &C,
        local: &[T],
        width: usize,
    ) -> Result<PendingHalo<'a, C, T>, MeshError>
    where
        C: Communicator,
        T: Pod,
    {
        if local.len() != self.n_elements * width {
            return Err(MeshError::BufferShape {
                expected: self.n_elements * width,
                got: local.len(),
            });
        }
        let tag = self.tag.as_u16();
        let recvs = self
            .neighbours
            .iter()
            .enumerate()
            .map(|(i, nb)| (i, comm.irecv(nb.rank, tag)))
            .collect();
        let mut packed: Vec<T> = Vec::new();
        let sends = self
            .neighbours
            .iter()
            .map(|nb| {
                packed.clear();
                for &e in &nb.send_elements {
                    packed.extend_from_slice(&local[e * width..(e + 1) * width]);
                }
                comm.isend(nb.rank, tag, cast_slice(&packed))
            })
            .collect();
        Ok(PendingHalo {
            pattern: self,
            width,
            recvs,
            sends,
            _payload: PhantomData,
        })
    }

    /// Blocking exchange: `data` holds `n_elements + n_halo` element records
    /// of `width` values; the halo tail is overwritten.
    pub fn exchange<C, T>(&mut self, comm: &C, data: &mut [T], width: usize) -> Result<(), MeshError>
    where
        C: Communicator,
        T: Pod,
    {
        let total = (self.n_elements + self.n_halo) * width;
        if data.len() != total {
            return Err(MeshError::BufferShape {
                expected: total,
                got: data.len(),
            });
        }
        let (local, halo) = data.split_at_mut(self.n_elements * width);
        self.exchange_start(comm, local, width)?.finish(halo)
    }
}

/// An exchange in flight. Dropping it without [`finish`](Self::finish) leaves
/// the posted messages unmatched.
#[must_use = "an exchange must be finished"]
pub struct PendingHalo<'a, C: Communicator, T: Pod> {
    pattern: &'a mut HaloPattern,
    width: usize,
    recvs: Vec<(usize, C::RecvHandle)>,
    sends: Vec<C::SendHandle>,
    _payload: PhantomData<T>,
}

impl<C: Communicator, T: Pod> PendingHalo<'_, C, T> {
    /// Wait for every neighbour and unpack into `halo`
    /// (`n_halo * width` values), then complete the sends.
    pub fn finish(self, halo: &mut [T]) -> Result<(), MeshError> {
        let width = self.width;
        let mut maybe_err = None;
        if halo.len() != self.pattern.n_halo * width {
            maybe_err = Some(MeshError::BufferShape {
                expected: self.pattern.n_halo * width,
                got: halo.len(),
            });
        }
        for (i, h) in self.recvs {
            let nb = &self.pattern.neighbours[i];
            let result = h
                .wait()
                .ok_or_else(|| MeshError::CommError {
                    neighbor: nb.rank,
                    message: "halo receive returned no data".into(),
                })
                .and_then(|raw| decode_records::<T>(nb.rank, &raw));
            match result {
                Ok(values) if values.len() == nb.recv_count * width => {
                    if maybe_err.is_none() {
                        let start = nb.recv_offset * width;
                        halo[start..start + values.len()].copy_from_slice(&values);
                    }
                }
                Ok(values) => {
                    maybe_err.get_or_insert(MeshError::CountMismatch {
                        neighbor: nb.rank,
                        expected: nb.recv_count * width,
                        got: values.len(),
                    });
                }
                Err(err) => {
                    maybe_err.get_or_insert(err);
                }
            }
        }
        for s in self.sends {
            let _ = s.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::connect::connect;
    use crate::topology::mesh::GlobalTriMesh;

    #[test]
    fn serial_pattern_is_empty() {
        let g = GlobalTriMesh::rectangle(2, 2, [0.0, 1.0], [0.0, 1.0], [1; 4]);
        let mut mesh = g.partition(0, 1).unwrap();
        connect(&NoComm, &mut mesh).unwrap();
        let mut halo = HaloPattern::new(&NoComm, &mesh).unwrap();
        assert_eq!(halo.n_halo(), 0);
        assert_eq!(halo.n_neighbours(), 0);
        let mut data = vec![1.0f64; mesh.n_elements * 2];
        halo.exchange(&NoComm, &mut data, 2).unwrap();
        let err = halo.exchange(&NoComm, &mut data[1..], 2).unwrap_err();
        assert!(matches!(err, MeshError::BufferShape { .. }));
    }
}
