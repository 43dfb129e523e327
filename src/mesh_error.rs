//! MeshError: unified error type for dg-assembly public APIs
//!
//! Every setup and exchange routine returns `Result<_, MeshError>`. The
//! conditions reported here are fatal for a distributed run: the caller is
//! expected to abort the job once one of them reaches the top level.

use thiserror::Error;

/// Unified error type for mesh, numbering, exchange and assembly operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshError {
    /// An element mapped from the reference triangle has a non-positive Jacobian.
    #[error("element {element} has non-positive Jacobian {jacobian:e}")]
    NonPositiveJacobian { element: usize, jacobian: f64 },
    /// Element/vertex tables are inconsistent with the declared sizes.
    #[error("invalid connectivity: {0}")]
    InvalidConnectivity(String),
    /// A face was matched by more than two element faces.
    #[error("face ({va}, {vb}) is shared by more than two elements")]
    NonManifoldFace { va: u64, vb: u64 },
    /// A node on a shared face had no coincident node on the neighbour.
    #[error("element {element} face {face}: node {node} has no match on the neighbour")]
    UnmatchedFaceNode {
        element: usize,
        face: usize,
        node: usize,
    },
    /// Invalid reference element request.
    #[error("invalid reference element: {0}")]
    InvalidReference(String),
    /// A buffer passed to an exchange does not have the pattern's shape.
    #[error("buffer has {got} entries, expected {expected}")]
    BufferShape { expected: usize, got: usize },
    /// Expected and received item counts disagree in a collective exchange.
    #[error("rank {neighbor}: expected {expected} items, received {got}")]
    CountMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Received byte count is not what the protocol announced.
    #[error("rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// The transport reported a failure while talking to `neighbor`.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
    /// A local index was outside the range covered by a numbering or block.
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}
