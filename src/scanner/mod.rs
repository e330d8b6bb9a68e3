//! Filesystem walker, glob matching, reference extraction and route simulation.

pub mod extractors;
pub mod glob;
pub mod references;
pub mod routes;
pub mod walker;
