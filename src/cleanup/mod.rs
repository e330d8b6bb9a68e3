//! Candidate selection, backup archiving, cleanup execution, and reporting.

pub mod archive;
pub mod executor;
pub mod report;
pub mod selector;
