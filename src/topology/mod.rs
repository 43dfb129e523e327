//! Local mesh partition and its connectivity: element tables, parallel face
//! matching, face node maps and boundary classification.

pub mod boundary;
pub mod connect;
pub mod face_nodes;
pub mod mesh;
