//! Boundary-condition classification of face tags.
//!
//! Meshes carry integer boundary tags per face (`0` = untagged). A
//! [`BoundaryTypeMap`] maps each tag to a raw condition code which resolves to
//! a [`BoundaryType`]: `<= 0` none, `1` essential (Dirichlet), `2` natural
//! (Neumann). Any other code, and any tag with no entry, falls back to
//! [`BoundaryType::Natural`] with a warning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum BoundaryType {
    /// Interior or untagged face.
    #[default]
    None,
    /// Dirichlet.
    Essential,
    /// Neumann.
    Natural,
}

impl BoundaryType {
    /// Classify a raw condition code; `None` for unrecognised codes.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            c if c <= 0 => Some(BoundaryType::None),
            1 => Some(BoundaryType::Essential),
            2 => Some(BoundaryType::Natural),
            _ => None,
        }
    }

    /// IPDG weights `(bcD, bcN)`.
    ///
    /// Face terms on a boundary face are scaled by `0.5 * (1 + bcD) * (1 - bcN)`:
    /// full weight for Dirichlet, none for Neumann, half on interior faces
    /// (which are visited once from each side).
    pub fn ipdg_flags(self) -> (f64, f64) {
        match self {
            BoundaryType::None => (0.0, 0.0),
            BoundaryType::Essential => (1.0, 0.0),
            BoundaryType::Natural => (0.0, 1.0),
        }
    }

    pub fn face_weight(self) -> f64 {
        let (bc_d, bc_n) = self.ipdg_flags();
        0.5 * (1.0 + bc_d) * (1.0 - bc_n)
    }
}

/// Tag -> condition code lookup supplied by the boundary-condition provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryTypeMap {
    codes: BTreeMap<i32, i32>,
}

impl BoundaryTypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of `tag -> code`.
    pub fn with(mut self, tag: i32, code: i32) -> Self {
        self.codes.insert(tag, code);
        self
    }

    pub fn insert(&mut self, tag: i32, code: i32) -> Option<i32> {
        self.codes.insert(tag, code)
    }

    /// Resolve a face tag. Tag `0` is always [`BoundaryType::None`].
    pub fn resolve(&self, tag: i32) -> BoundaryType {
        if tag == 0 {
            return BoundaryType::None;
        }
        match self.codes.get(&tag) {
            Some(&code) => BoundaryType::from_code(code).unwrap_or_else(|| {
                log::warn!("boundary tag {tag}: unknown condition code {code}, using natural");
                BoundaryType::Natural
            }),
            None => {
                log::warn!("boundary tag {tag} has no condition code, using natural");
                BoundaryType::Natural
            }
        }
    }

    /// Resolve every distinct tag once, so fallbacks warn once per tag.
    pub fn resolve_tags<I>(&self, tags: I) -> BTreeMap<i32, BoundaryType>
    where
        I: IntoIterator<Item = i32>,
    {
        let mut out = BTreeMap::new();
        for tag in tags {
            out.entry(tag).or_insert_with(|| self.resolve(tag));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_classify() {
        assert_eq!(BoundaryType::from_code(0), Some(BoundaryType::None));
        assert_eq!(BoundaryType::from_code(-3), Some(BoundaryType::None));
        assert_eq!(BoundaryType::from_code(1), Some(BoundaryType::Essential));
        assert_eq!(BoundaryType::from_code(2), Some(BoundaryType::Natural));
        assert_eq!(BoundaryType::from_code(7), None);
    }

    #[test]
    fn unknown_codes_and_tags_fall_back_to_natural() {
        let map = BoundaryTypeMap::new().with(1, 1).with(3, 9);
        assert_eq!(map.resolve(0), BoundaryType::None);
        assert_eq!(map.resolve(1), BoundaryType::Essential);
        assert_eq!(map.resolve(3), BoundaryType::Natural);
        assert_eq!(map.resolve(4), BoundaryType::Natural);
    }

    #[test]
    fn face_weights() {
        assert_eq!(BoundaryType::None.face_weight(), 0.5);
        assert_eq!(BoundaryType::Essential.face_weight(), 1.0);
        assert_eq!(BoundaryType::Natural.face_weight(), 0.0);
    }

    #[test]
    fn map_roundtrips_through_json() {
        let map = BoundaryTypeMap::new().with(1, 1).with(2, 2).with(5, 1);
        let json = serde_json::to_string(&map).unwrap();
        let back: BoundaryTypeMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
