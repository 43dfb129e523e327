//! Nodal reference element and the distributed DG mesh built on it.

pub mod dg_mesh;
pub mod reference;

pub use dg_mesh::DgMesh;
pub use reference::ReferenceTriangle;
