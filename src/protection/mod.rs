//! Protection set: the union of every path that must never be removed.
//!
//! Three origin subsets are kept side by side so reports can say *why* a
//! path is protected:
//! - **tracked**: paths known to version control
//! - **referenced**: paths resolved by the reference scanner and route simulator
//! - **allowlisted**: walked paths matching an operator-declared pattern
//!
//! The set is built once per run by a pure union and is immutable after
//! construction. Nothing removes a path once any subset holds it.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{Result, SweepError};
use crate::scanner::glob::PatternSet;
use crate::scanner::walker::FileNode;

#[cfg(test)]
mod test_properties;

/// Which subset holds a protected path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionOrigin {
    Tracked,
    Referenced,
    Allowlisted,
}

impl ProtectionOrigin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tracked => "tracked",
            Self::Referenced => "referenced",
            Self::Allowlisted => "allowlisted",
        }
    }
}

/// Per-subset sizes for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtectionCounts {
    pub tracked: usize,
    pub referenced: usize,
    pub allowlisted: usize,
    /// Distinct paths across all subsets.
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionSet {
    tracked: BTreeSet<PathBuf>,
    referenced: BTreeSet<PathBuf>,
    allowlisted: BTreeSet<PathBuf>,
    merged: BTreeSet<PathBuf>,
}

impl ProtectionSet {
    /// Pure union of the three subsets. No I/O; identical inputs give an
    /// identical set.
    pub fn build(
        tracked: BTreeSet<PathBuf>,
        referenced: BTreeSet<PathBuf>,
        allowlisted: BTreeSet<PathBuf>,
    ) -> Self {
        let merged = tracked
            .iter()
            .chain(&referenced)
            .chain(&allowlisted)
            .cloned()
            .collect();
        Self {
            tracked,
            referenced,
            allowlisted,
            merged,
        }
    }

    /// Whether `path` or any of its ancestors is protected.
    pub fn contains(&self, path: &Path) -> bool {
        path.ancestors()
            .take_while(|p| !p.as_os_str().is_empty())
            .any(|p| self.merged.contains(p))
    }

    /// Subsets protecting `path` directly or through an ancestor.
    pub fn origins(&self, path: &Path) -> Vec<ProtectionOrigin> {
        let holds = |subset: &BTreeSet<PathBuf>| {
            path.ancestors()
                .take_while(|p| !p.as_os_str().is_empty())
                .any(|p| subset.contains(p))
        };
        [
            (ProtectionOrigin::Tracked, &self.tracked),
            (ProtectionOrigin::Referenced, &self.referenced),
            (ProtectionOrigin::Allowlisted, &self.allowlisted),
        ]
        .into_iter()
        .filter(|(_, subset)| holds(subset))
        .map(|(origin, _)| origin)
        .collect()
    }

    /// Every protected path in order.
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.merged.iter()
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    pub fn tracked(&self) -> &BTreeSet<PathBuf> {
        &self.tracked
    }

    pub fn referenced(&self) -> &BTreeSet<PathBuf> {
        &self.referenced
    }

    pub fn allowlisted(&self) -> &BTreeSet<PathBuf> {
        &self.allowlisted
    }

    pub fn counts(&self) -> ProtectionCounts {
        ProtectionCounts {
            tracked: self.tracked.len(),
            referenced: self.referenced.len(),
            allowlisted: self.allowlisted.len(),
            total: self.merged.len(),
        }
    }
}

/// Operator-declared critical-path patterns.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    patterns: PatternSet,
}

impl Allowlist {
    /// Compile inline patterns.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let cleaned: Vec<String> = patterns
            .iter()
            .filter_map(|p| clean_line(p.as_ref()))
            .collect();
        Ok(Self {
            patterns: PatternSet::new(&cleaned)?,
        })
    }

    /// Load an allowlist file (one pattern per line, `#` comments) and merge
    /// it with inline patterns. A missing file is a configuration error.
    pub fn load(path: &Path, inline: &[String]) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                SweepError::MissingAllowlist {
                    path: path.to_path_buf(),
                }
            } else {
                SweepError::io(path, source)
            }
        })?;
        let lines: Vec<&str> = text.lines().chain(inline.iter().map(String::as_str)).collect();
        Self::from_patterns(&lines)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Walked paths matched by any pattern, directly or via an ancestor.
    pub fn evaluate(&self, nodes: &[FileNode]) -> BTreeSet<PathBuf> {
        if self.patterns.is_empty() {
            return BTreeSet::new();
        }
        nodes
            .iter()
            .filter(|node| self.patterns.matches_self_or_ancestor(&node.path))
            .map(|node| node.path.clone())
            .collect()
    }
}

/// Strip comments, whitespace and leading/trailing separators.
fn clean_line(line: &str) -> Option<String> {
    let line = line.split_once('#').map_or(line, |(before, _)| before).trim();
    let line = line.trim_start_matches("./").trim_start_matches('/').trim_end_matches('/');
    (!line.is_empty()).then(|| line.to_string())
}
