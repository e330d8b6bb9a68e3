//! Version-control index readers: read-only sources of tracked paths.
//!
//! Tracked paths are authoritative protection input. A provider that cannot
//! answer returns an empty set plus a warning rather than an error; the other
//! protection subsets still apply.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::paths::{normalize_relative, path_from_bytes};

/// Tracked paths plus an optional reason the set may be incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedPaths {
    pub paths: BTreeSet<PathBuf>,
    pub warning: Option<String>,
}

pub trait TrackedPathProvider {
    /// Root-relative paths tracked under `root`.
    fn tracked_paths(&self, root: &Path) -> TrackedPaths;
}

/// Git index via `git -C <root> ls-files -z`.
#[derive(Debug, Clone)]
pub struct GitIndex {
    binary: String,
}

impl GitIndex {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for GitIndex {
    fn default() -> Self {
        Self::new("git")
    }
}

impl TrackedPathProvider for GitIndex {
    fn tracked_paths(&self, root: &Path) -> TrackedPaths {
        let output = match Command::new(&self.binary)
            .arg("-C")
            .arg(root)
            .args(["ls-files", "-z", "--cached"])
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                return TrackedPaths {
                    paths: BTreeSet::new(),
                    warning: Some(format!("failed to execute {}: {e}", self.binary)),
                };
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return TrackedPaths {
                paths: BTreeSet::new(),
                warning: Some(format!(
                    "git ls-files exited with {}: {}",
                    output.status,
                    stderr.trim()
                )),
            };
        }

        TrackedPaths {
            paths: parse_ls_files(&output.stdout),
            warning: None,
        }
    }
}

/// NUL-separated `ls-files -z` output to normalized relative paths.
fn parse_ls_files(stdout: &[u8]) -> BTreeSet<PathBuf> {
    stdout
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| normalize_relative(&path_from_bytes(entry)))
        .collect()
}

/// A fixed tracked set; empty for `--no-vcs`.
#[derive(Debug, Clone, Default)]
pub struct StaticTracked {
    paths: BTreeSet<PathBuf>,
}

impl StaticTracked {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl TrackedPathProvider for StaticTracked {
    fn tracked_paths(&self, _root: &Path) -> TrackedPaths {
        TrackedPaths {
            paths: self.paths.clone(),
            warning: None,
        }
    }
}
