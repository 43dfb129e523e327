//! Geometric factors, physical nodes and characteristic lengths of triangle
//! elements.

pub mod curved;
pub mod length;
pub mod metrics;
