//! Core types: errors, configuration, path normalization, cancellation.

pub mod cancel;
pub mod config;
pub mod errors;
pub mod paths;
