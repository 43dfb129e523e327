//! Fixed, little-endian wire types for the exchange protocols.
//!
//! Every record is a `#[repr(C)]` `Pod` struct built only from 8-byte fields,
//! so a payload's record count is always `bytes / size_of::<Record>()`.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::mesh_error::MeshError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a received byte buffer into owned records.
///
/// Received `Vec<u8>` buffers carry no alignment guarantee, so this copies
/// instead of casting in place.
pub fn decode_records<T: Pod>(neighbor: usize, raw: &[u8]) -> Result<Vec<T>, MeshError> {
    let width = size_of::<T>();
    if width == 0 || raw.len() % width != 0 {
        return Err(MeshError::BufferSizeMismatch {
            neighbor,
            expected: raw.len().next_multiple_of(width.max(1)),
            got: raw.len(),
        });
    }
    let mut out = vec![T::zeroed(); raw.len() / width];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(raw);
    Ok(out)
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

// ===== Parallel face matching ==============================================

/// An unmatched element face, keyed by its sorted global vertex pair and
/// routed to the rendezvous rank `va % size`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WireFace {
    pub va_le: u64,
    pub vb_le: u64,
    pub rank_le: u64,
    pub element_le: u64,
    pub face_le: u64,
}
impl WireFace {
    pub fn new(va: u64, vb: u64, rank: usize, element: usize, face: usize) -> Self {
        Self {
            va_le: va.to_le(),
            vb_le: vb.to_le(),
            rank_le: (rank as u64).to_le(),
            element_le: (element as u64).to_le(),
            face_le: (face as u64).to_le(),
        }
    }
    pub fn key(&self) -> (u64, u64) {
        (u64::from_le(self.va_le), u64::from_le(self.vb_le))
    }
    pub fn rank(&self) -> usize {
        u64::from_le(self.rank_le) as usize
    }
    pub fn element(&self) -> usize {
        u64::from_le(self.element_le) as usize
    }
    pub fn face(&self) -> usize {
        u64::from_le(self.face_le) as usize
    }
}

/// Reply to a face owner: `(element, face)` on the recipient matches
/// `(nbr_element, nbr_face)` on `nbr_rank`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WireFaceMatch {
    pub element_le: u64,
    pub face_le: u64,
    pub nbr_rank_le: u64,
    pub nbr_element_le: u64,
    pub nbr_face_le: u64,
}
impl WireFaceMatch {
    pub fn new(element: usize, face: usize, nbr: &WireFace) -> Self {
        Self {
            element_le: (element as u64).to_le(),
            face_le: (face as u64).to_le(),
            nbr_rank_le: nbr.rank_le,
            nbr_element_le: nbr.element_le,
            nbr_face_le: nbr.face_le,
        }
    }
    pub fn decode(&self) -> (usize, usize, usize, usize, usize) {
        (
            u64::from_le(self.element_le) as usize,
            u64::from_le(self.face_le) as usize,
            u64::from_le(self.nbr_rank_le) as usize,
            u64::from_le(self.nbr_element_le) as usize,
            u64::from_le(self.nbr_face_le) as usize,
        )
    }
}

// ===== Consecutive numbering ===============================================

/// Candidate id of one local DOF, sent to its rendezvous rank.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WireCandidate {
    pub candidate_le: u64,
    pub origin_le: u64,
    pub local_le: u64,
}
impl WireCandidate {
    pub fn new(candidate: u64, origin: usize, local: usize) -> Self {
        Self {
            candidate_le: candidate.to_le(),
            origin_le: (origin as u64).to_le(),
            local_le: (local as u64).to_le(),
        }
    }
    pub fn candidate(&self) -> u64 {
        u64::from_le(self.candidate_le)
    }
    pub fn origin(&self) -> usize {
        u64::from_le(self.origin_le) as usize
    }
    pub fn local(&self) -> usize {
        u64::from_le(self.local_le) as usize
    }
}

/// Final `(global id, owner)` for a local DOF, returned to its origin.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WireAssignment {
    pub local_le: u64,
    pub global_le: u64,
    pub owner_le: u64,
}
impl WireAssignment {
    pub fn new(local: usize, global: u64, owner: usize) -> Self {
        Self {
            local_le: (local as u64).to_le(),
            global_le: global.to_le(),
            owner_le: (owner as u64).to_le(),
        }
    }
    pub fn decode(&self) -> (usize, u64, usize) {
        (
            u64::from_le(self.local_le) as usize,
            u64::from_le(self.global_le),
            u64::from_le(self.owner_le) as usize,
        )
    }
}

// ===== Sparse assembly =====================================================

/// One non-zero contribution: row id, column id, owner rank, value.
/// Field order and width are part of the protocol.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WireNonZero {
    pub row_le: u64,
    pub col_le: u64,
    pub owner_le: u64,
    pub val_bits_le: u64,
}
impl WireNonZero {
    pub const SIZE: usize = 32;

    pub fn new(row: u64, col: u64, owner: usize, val: f64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
            owner_le: (owner as u64).to_le(),
            val_bits_le: val.to_bits().to_le(),
        }
    }
    pub fn decode(&self) -> (u64, u64, usize, f64) {
        (
            u64::from_le(self.row_le),
            u64::from_le(self.col_le),
            u64::from_le(self.owner_le) as usize,
            f64::from_bits(u64::from_le(self.val_bits_le)),
        )
    }
}

const_assert_eq!(size_of::<WireCount>(), 8);
const_assert_eq!(size_of::<WireFace>(), 40);
const_assert_eq!(size_of::<WireFaceMatch>(), 40);
const_assert_eq!(size_of::<WireCandidate>(), 24);
const_assert_eq!(size_of::<WireAssignment>(), 24);
const_assert_eq!(size_of::<WireNonZero>(), WireNonZero::SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_fields_survive_the_wire() {
        let recs = [WireNonZero::new(3, 7, 1, -0.5), WireNonZero::new(9, 2, 0, 1e-11)];
        let bytes = cast_slice(&recs).to_vec();
        assert_eq!(bytes.len(), 2 * WireNonZero::SIZE);
        let back: Vec<WireNonZero> = decode_records(0, &bytes).unwrap();
        assert_eq!(back[0].decode(), (3, 7, 1, -0.5));
        assert_eq!(back[1].decode(), (9, 2, 0, 1e-11));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = vec![0u8; WireNonZero::SIZE + 5];
        let err = decode_records::<WireNonZero>(2, &bytes).unwrap_err();
        assert!(matches!(err, MeshError::BufferSizeMismatch { neighbor: 2, .. }));
    }
}
