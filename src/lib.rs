#![forbid(unsafe_code)]

//! Repository sweep (rsweep): reachability-aware, reversible cleanup of
//! build and cache artifacts.
//!
//! A run walks the tree, scans sources for references to other files,
//! unions tracked, referenced, and allowlisted paths into a protection set,
//! and selects unprotected files matching the include patterns. Nothing is
//! removed until every candidate sits in a verified backup archive.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use repo_sweep::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use repo_sweep::core::config::Config;
//! use repo_sweep::scanner::walker::{FileNode, FileWalker};
//! ```

pub mod prelude;

pub mod cleanup;
pub mod core;
pub mod logger;
pub mod pipeline;
pub mod platform;
pub mod protection;
pub mod scanner;
pub mod vcs;
