//! Gather (reduce into owner) and scatter (broadcast from owner) over DOFs that
//! share a global id.
//!
//! Local duplicates are grouped by global id; the first local index of each
//! group is its *base*. On a non-owning rank the base stands for the whole
//! local group when talking to the owner. Non-owned ids are announced to their
//! owner once, sorted ascending, and the owner maps each announced id to its
//! own base. Message payloads are then plain value arrays in that order.

use bytemuck::Pod;
use num_traits::Num;
use std::collections::HashMap;

use crate::algs::collectives::{all_to_all_v, bucket_by_rank};
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{cast_slice, decode_records};
use crate::mesh_error::MeshError;

/// Associative, commutative reduction used by [`GatherScatter::gather`].
pub trait GatherOp<T> {
    fn combine(&self, acc: T, value: T) -> T;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct AddOp;

#[derive(Copy, Clone, Debug, Default)]
pub struct MinOp;

#[derive(Copy, Clone, Debug, Default)]
pub struct MaxOp;

impl<T: Num + Copy> GatherOp<T> for AddOp {
    #[inline]
    fn combine(&self, acc: T, value: T) -> T {
        acc + value
    }
}

impl<T: PartialOrd + Copy> GatherOp<T> for MinOp {
    #[inline]
    fn combine(&self, acc: T, value: T) -> T {
        if value < acc { value } else { acc }
    }
}

impl<T: PartialOrd + Copy> GatherOp<T> for MaxOp {
    #[inline]
    fn combine(&self, acc: T, value: T) -> T {
        if value > acc { value } else { acc }
    }
}

/// One rank's share of the remote traffic: the local groups whose values are
/// exchanged with it, in wire order.
#[derive(Clone, Debug)]
struct RemoteGroups {
    rank: usize,
    groups: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct GatherScatter {
    n_local: usize,
    tag: CommTag,
    /// CSR: `members[offsets[g]..offsets[g + 1]]`, base first.
    offsets: Vec<usize>,
    members: Vec<usize>,
    owned: Vec<bool>,
    /// Non-owned groups, per owner rank.
    to_owner: Vec<RemoteGroups>,
    /// Owned groups announced by each duplicating rank.
    from_dups: Vec<RemoteGroups>,
}

impl GatherScatter {
    pub fn new<C: Communicator>(
        comm: &C,
        global_ids: &[u64],
        global_owners: &[usize],
    ) -> Result<Self, MeshError> {
        Self::with_tag(comm, global_ids, global_owners, CommTag::new(0x0300))
    }

    pub fn with_tag<C: Communicator>(
        comm: &C,
        global_ids: &[u64],
        global_owners: &[usize],
        tag: CommTag,
    ) -> Result<Self, MeshError> {
        let me = comm.rank();
        let size = comm.size();
        if global_owners.len() != global_ids.len() {
            return Err(MeshError::BufferShape {
                expected: global_ids.len(),
                got: global_owners.len(),
            });
        }

        // local grouping; a stable sort keeps the lowest index first
        let mut order: Vec<usize> = (0..global_ids.len()).collect();
        order.sort_by_key(|&i| global_ids[i]);
        let mut offsets = vec![0];
        let mut members = Vec::with_capacity(order.len());
        let mut group_ids = Vec::new();
        let mut owned = Vec::new();
        for &i in &order {
            if group_ids.last() != Some(&global_ids[i]) {
                if !group_ids.is_empty() {
                    offsets.push(members.len());
                }
                group_ids.push(global_ids[i]);
                owned.push(global_owners[i] == me);
            }
            members.push(i);
        }
        offsets.push(members.len());
        if group_ids.is_empty() {
            offsets.truncate(1);
        }

        // announce non-owned ids (ascending, since groups are sorted) to owners
        let announcements: Vec<(usize, u64)> = group_ids
            .iter()
            .enumerate()
            .filter(|&(g, _)| !owned[g])
            .map(|(g, &id)| (global_owners[members[offsets[g]]], id))
            .collect();
        if let Some(&(owner, _)) = announcements.iter().find(|(o, _)| *o >= size) {
            return Err(MeshError::InvalidConnectivity(format!(
                "owner rank {owner} outside communicator of size {size}"
            )));
        }
        let to_owner = group_by_rank(
            announcements
                .iter()
                .zip((0..group_ids.len()).filter(|&g| !owned[g]))
                .map(|(&(owner, _), g)| (owner, g)),
        );
        let (send, counts) = bucket_by_rank(announcements, size);
        let (announced, recv_counts) = all_to_all_v(comm, tag.offset(2), &send, &counts)?;

        let lookup: HashMap<u64, usize> = group_ids
            .iter()
            .enumerate()
            .filter(|&(g, _)| owned[g])
            .map(|(g, &id)| (id, g))
            .collect();
        let mut from_dups = Vec::new();
        let mut cursor = 0;
        for (rank, &n) in recv_counts.iter().enumerate() {
            if n == 0 {
                continue;
            }
            let groups = announced[cursor..cursor + n]
                .iter()
                .map(|id| {
                    lookup.get(id).copied().ok_or_else(|| {
                        MeshError::InvalidConnectivity(format!(
                            "rank {rank} announced id {id} which rank {me} does not own"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            from_dups.push(RemoteGroups { rank, groups });
            cursor += n;
        }

        log::debug!(
            "rank {me}: gather-scatter over {} local dofs, {} groups, {} owners, {} duplicators",
            global_ids.len(),
            group_ids.len(),
            to_owner.len(),
            from_dups.len()
        );
        Ok(Self {
            n_local: global_ids.len(),
            tag,
            offsets,
            members,
            owned,
            to_owner,
            from_dups,
        })
    }

    pub fn n_groups(&self) -> usize {
        self.owned.len()
    }

    fn group(&self, g: usize) -> &[usize] {
        &self.members[self.offsets[g]..self.offsets[g + 1]]
    }

    fn local_reduce<T: Copy, O: GatherOp<T>>(&self, values: &[T], g: usize, op: &O) -> T {
        let group = self.group(g);
        group[1..]
            .iter()
            .fold(values[group[0]], |acc, &m| op.combine(acc, values[m]))
    }

    /// Reduce every group into its owner's base slot.
    ///
    /// Only owned base slots change; every other entry, on every rank, keeps
    /// its value until [`scatter`](Self::scatter).
    pub fn gather<C, T, O>(&self, comm: &C, values: &mut [T], op: &O) -> Result<(), MeshError>
    where
        C: Communicator,
        T: Pod,
        O: GatherOp<T>,
    {
        self.check_len(values.len())?;
        let tag = self.tag.as_u16();
        let recvs: Vec<_> = self
            .from_dups
            .iter()
            .map(|rg| comm.irecv(rg.rank, tag))
            .collect();
        let sends: Vec<_> = self
            .to_owner
            .iter()
            .map(|rg| {
                let partial: Vec<T> = rg
                    .groups
                    .iter()
                    .map(|&g| self.local_reduce(values, g, op))
                    .collect();
                comm.isend(rg.rank, tag, cast_slice(&partial))
            })
            .collect();

        for g in (0..self.n_groups()).filter(|&g| self.owned[g]) {
            let base = self.group(g)[0];
            values[base] = self.local_reduce(values, g, op);
        }

        let result = self.drain_into(recvs, &self.from_dups, |g, v: T| {
            let base = self.group(g)[0];
            values[base] = op.combine(values[base], v);
        });
        for s in sends {
            let _ = s.wait();
        }
        result
    }

    /// Broadcast each owner's base value to every duplicate, local and remote.
    pub fn scatter<C, T>(&self, comm: &C, values: &mut [T]) -> Result<(), MeshError>
    where
        C: Communicator,
        T: Pod,
    {
        self.check_len(values.len())?;
        let tag = self.tag.offset(1).as_u16();
        let recvs: Vec<_> = self
            .to_owner
            .iter()
            .map(|rg| comm.irecv(rg.rank, tag))
            .collect();
        let sends: Vec<_> = self
            .from_dups
            .iter()
            .map(|rg| {
                let owned: Vec<T> = rg.groups.iter().map(|&g| values[self.group(g)[0]]).collect();
                comm.isend(rg.rank, tag, cast_slice(&owned))
            })
            .collect();

        let result = self.drain_into(recvs, &self.to_owner, |g, v: T| {
            values[self.group(g)[0]] = v;
        });
        for s in sends {
            let _ = s.wait();
        }
        result?;

        for g in 0..self.n_groups() {
            let group = self.group(g);
            let v = values[group[0]];
            for &m in &group[1..] {
                values[m] = v;
            }
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<(), MeshError> {
        if len != self.n_local {
            return Err(MeshError::BufferShape {
                expected: self.n_local,
                got: len,
            });
        }
        Ok(())
    }

    /// Wait on `recvs` (one per entry of `peers`) and apply each value to its
    /// group. Every handle is drained even after an error.
    fn drain_into<H, T, F>(
        &self,
        recvs: Vec<H>,
        peers: &[RemoteGroups],
        mut apply: F,
    ) -> Result<(), MeshError>
    where
        H: Wait,
        T: Pod,
        F: FnMut(usize, T),
    {
        let mut maybe_err = None;
        for (h, rg) in recvs.into_iter().zip(peers) {
            let decoded = h
                .wait()
                .ok_or_else(|| MeshError::CommError {
                    neighbor: rg.rank,
                    message: "gather-scatter receive returned no data".into(),
                })
                .and_then(|raw| decode_records::<T>(rg.rank, &raw));
            match decoded {
                Ok(vals) if vals.len() == rg.groups.len() => {
                    if maybe_err.is_none() {
                        for (&g, v) in rg.groups.iter().zip(vals) {
                            apply(g, v);
                        }
                    }
                }
                Ok(vals) => {
                    maybe_err.get_or_insert(MeshError::CountMismatch {
                        neighbor: rg.rank,
                        expected: rg.groups.len(),
                        got: vals.len(),
                    });
                }
                Err(err) => {
                    maybe_err.get_or_insert(err);
                }
            }
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn group_by_rank(pairs: impl Iterator<Item = (usize, usize)>) -> Vec<RemoteGroups> {
    let mut sorted: Vec<(usize, usize)> = pairs.collect();
    // stable: keeps ascending-id order within a rank
    sorted.sort_by_key(|&(rank, _)| rank);
    let mut out: Vec<RemoteGroups> = Vec::new();
    for (rank, g) in sorted {
        match out.last_mut() {
            Some(rg) if rg.rank == rank => rg.groups.push(g),
            _ => out.push(RemoteGroups {
                rank,
                groups: vec![g],
            }),
        }
    }
    out
}
