//! Distributed algorithms: communication, numbering, exchange and assembly.

pub mod assembly;
pub mod collectives;
pub mod communicator;
pub mod gather_scatter;
pub mod halo;
pub mod numbering;
pub mod par;
pub mod wire;

pub use assembly::build_ipdg_operator;
pub use numbering::GlobalNumbering;
