//! Coordinate-format non-zeros and the distributed matrix they assemble into.
//!
//! Contributions are generated on whatever rank owns the element that produced
//! them, routed to the rank that owns their row, then merged with
//! [`sort_and_compact`].

use crate::algs::collectives::{all_to_all_v, bucket_by_rank};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireNonZero;
use crate::mesh_error::MeshError;

/// Contributions (and compacted sums) with `|val|` at or below this are dropped.
pub const DROP_TOLERANCE: f64 = 1e-12;

/// One matrix contribution. `owner` is the rank that owns `row`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NonZero {
    pub row: u64,
    pub col: u64,
    pub owner: usize,
    pub val: f64,
}

impl NonZero {
    fn to_wire(self) -> WireNonZero {
        WireNonZero::new(self.row, self.col, self.owner, self.val)
    }

    fn from_wire(w: &WireNonZero) -> Self {
        let (row, col, owner, val) = w.decode();
        Self { row, col, owner, val }
    }
}

/// Push `(row, col, val)` unless `|val|` is within [`DROP_TOLERANCE`] of zero.
#[inline]
pub fn add_non_zero(out: &mut Vec<NonZero>, row: u64, col: u64, owner: usize, val: f64) {
    if val.abs() > DROP_TOLERANCE {
        out.push(NonZero { row, col, owner, val });
    }
}

/// Stable sort by `(row, col)` and merge duplicates by summation.
///
/// Sums that cancel to within [`DROP_TOLERANCE`] are removed. Since the sort is
/// stable, duplicates are summed in arrival order, which makes the result
/// reproducible for a fixed input order.
pub fn sort_and_compact(mut entries: Vec<NonZero>) -> Vec<NonZero> {
    entries.sort_by_key(|nz| (nz.row, nz.col));
    let mut out: Vec<NonZero> = Vec::with_capacity(entries.len());
    for nz in entries {
        match out.last_mut() {
            Some(last) if last.row == nz.row && last.col == nz.col => last.val += nz.val,
            _ => out.push(nz),
        }
    }
    out.retain(|nz| nz.val.abs() > DROP_TOLERANCE);
    out
}

/// Local rows of a row-distributed sparse matrix.
///
/// Rank `r` owns global rows `global_starts[r]..global_starts[r + 1]`; every
/// entry stored here has `owner == rank`.
#[derive(Clone, Debug, PartialEq)]
pub struct DistributedMatrix {
    pub rank: usize,
    pub global_starts: Vec<u64>,
    /// Sorted by `(row, col)`, unique.
    pub entries: Vec<NonZero>,
}

/// Compressed-row view of the locally owned rows. Row `i` is global row
/// `first_row + i`; column indices stay global.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalCsr {
    pub first_row: u64,
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<u64>,
    pub vals: Vec<f64>,
}

impl DistributedMatrix {
    /// Route `contributions` to their owner ranks and merge them there.
    pub fn assemble<C: Communicator>(
        comm: &C,
        tag: CommTag,
        global_starts: Vec<u64>,
        contributions: Vec<NonZero>,
    ) -> Result<Self, MeshError> {
        let size = comm.size();
        if global_starts.len() != size + 1 {
            return Err(MeshError::BufferShape {
                expected: size + 1,
                got: global_starts.len(),
            });
        }
        let mut routed = Vec::with_capacity(contributions.len());
        for nz in contributions {
            if nz.owner >= size {
                return Err(MeshError::IndexOutOfBounds {
                    index: nz.owner,
                    len: size,
                });
            }
            routed.push((nz.owner, nz.to_wire()));
        }
        let (send, counts) = bucket_by_rank(routed, size);
        let (received, _) = all_to_all_v(comm, tag, &send, &counts)?;
        let entries = sort_and_compact(received.iter().map(NonZero::from_wire).collect());
        log::debug!(
            "rank {}: {} non-zeros sent, {} kept after compaction",
            comm.rank(),
            send.len(),
            entries.len()
        );
        Ok(Self {
            rank: comm.rank(),
            global_starts,
            entries,
        })
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Number of rows owned by this rank.
    pub fn n_local_rows(&self) -> usize {
        (self.global_starts[self.rank + 1] - self.global_starts[self.rank]) as usize
    }

    pub fn n_global_rows(&self) -> u64 {
        self.global_starts.last().copied().unwrap_or(0)
    }

    pub fn get(&self, row: u64, col: u64) -> Option<f64> {
        self.entries
            .binary_search_by_key(&(row, col), |nz| (nz.row, nz.col))
            .ok()
            .map(|i| self.entries[i].val)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NonZero> + '_ {
        self.entries.iter()
    }

    pub fn to_csr(&self) -> Result<LocalCsr, MeshError> {
        let first_row = self.global_starts[self.rank];
        let n_rows = self.n_local_rows();
        let mut row_ptr = vec![0usize; n_rows + 1];
        for nz in &self.entries {
            let local = nz
                .row
                .checked_sub(first_row)
                .map(|r| r as usize)
                .filter(|&r| r < n_rows)
                .ok_or(MeshError::IndexOutOfBounds {
                    index: nz.row as usize,
                    len: n_rows,
                })?;
            row_ptr[local + 1] += 1;
        }
        for i in 0..n_rows {
            row_ptr[i + 1] += row_ptr[i];
        }
        Ok(LocalCsr {
            first_row,
            row_ptr,
            col_idx: self.entries.iter().map(|nz| nz.col).collect(),
            vals: self.entries.iter().map(|nz| nz.val).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use proptest::prelude::*;

    fn nz(row: u64, col: u64, val: f64) -> NonZero {
        NonZero { row, col, owner: 0, val }
    }

    #[test]
    fn tolerance_filter() {
        let mut out = Vec::new();
        add_non_zero(&mut out, 0, 0, 0, 1e-13);
        add_non_zero(&mut out, 0, 1, 0, 1e-11);
        add_non_zero(&mut out, 0, 2, 0, -1e-11);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].col, 1);
    }

    #[test]
    fn duplicates_are_summed_and_cancellations_dropped() {
        let out = sort_and_compact(vec![
            nz(3, 7, 1.5),
            nz(1, 1, 2.0),
            nz(3, 7, -0.5),
            nz(2, 0, 1.0),
            nz(2, 0, -1.0),
        ]);
        assert_eq!(out, vec![nz(1, 1, 2.0), nz(3, 7, 1.0)]);
    }

    #[test]
    fn serial_assembly_and_csr() {
        let m = DistributedMatrix::assemble(
            &NoComm,
            CommTag::new(0x0500),
            vec![0, 3],
            vec![nz(2, 0, 1.0), nz(0, 0, 4.0), nz(0, 2, -1.0), nz(2, 0, 1.0)],
        )
        .unwrap();
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.get(2, 0), Some(2.0));
        assert_eq!(m.get(1, 1), None);
        let csr = m.to_csr().unwrap();
        assert_eq!(csr.row_ptr, vec![0, 2, 2, 3]);
        assert_eq!(csr.col_idx, vec![0, 2, 0]);
    }

    proptest! {
        #[test]
        fn compaction_preserves_row_sums(
            raw in prop::collection::vec((0u64..5, 0u64..5, -10i32..10), 0..60)
        ) {
            let entries: Vec<NonZero> =
                raw.iter().map(|&(r, c, v)| nz(r, c, v as f64)).collect();
            let out = sort_and_compact(entries);
            for w in out.windows(2) {
                prop_assert!((w[0].row, w[0].col) < (w[1].row, w[1].col));
            }
            for row in 0..5u64 {
                let before: f64 = raw.iter().filter(|t| t.0 == row).map(|t| t.2 as f64).sum();
                let after: f64 = out.iter().filter(|nz| nz.row == row).map(|nz| nz.val).sum();
                prop_assert!((before - after).abs() < 1e-9);
            }
        }
    }
}
