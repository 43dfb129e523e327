#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dg-assembly
//!
//! dg-assembly holds the distributed-memory plumbing of a nodal discontinuous
//! Galerkin solver on triangle meshes: parallel face matching, global DOF
//! numbering, halo and gather-scatter exchange, and assembly of the symmetric
//! interior-penalty operator into a row-distributed sparse matrix.
//!
//! ## Features
//! - Pluggable communication backends (serial, in-process threads, MPI) behind
//!   one [`Communicator`](algs::communicator::Communicator) trait
//! - Rendezvous-based face matching and "squeezed" consecutive numbering with
//!   no coordinator rank
//! - Split-phase halo exchange of any `Pod` payload
//! - IPDG operator assembly with optional projection onto a target basis
//! - Curved elements on a circular boundary arc
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! dg-assembly = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ## Determinism
//!
//! Numbering, halo ordering and compaction depend only on the mesh and the
//! communicator size, never on message arrival order or thread scheduling.

pub mod algs;
pub mod data;
pub mod discretization;
pub mod geometry;
pub mod mesh_error;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::assembly::{
        AssemblyOptions, IpdgOperator, PenaltyParams, build_ipdg_operator,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm};
    pub use crate::algs::gather_scatter::{AddOp, GatherOp, GatherScatter, MaxOp, MinOp};
    pub use crate::algs::halo::HaloPattern;
    pub use crate::algs::numbering::{GlobalNumbering, NumberingMode};
    pub use crate::data::dense::DenseBlock;
    pub use crate::data::sparse::{DistributedMatrix, NonZero};
    pub use crate::discretization::dg_mesh::DgMesh;
    pub use crate::discretization::reference::ReferenceTriangle;
    pub use crate::geometry::curved::CurvedBoundary;
    pub use crate::geometry::length::min_characteristic_length;
    pub use crate::mesh_error::MeshError;
    pub use crate::topology::boundary::{BoundaryType, BoundaryTypeMap};
    pub use crate::topology::mesh::{GlobalTriMesh, TriMesh};
}
