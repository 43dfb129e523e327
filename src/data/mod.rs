//! Data module: dense element blocks and distributed sparse matrices.

pub mod dense;
pub mod sparse;

pub use dense::DenseBlock;
pub use sparse::{DistributedMatrix, LocalCsr, NonZero};
