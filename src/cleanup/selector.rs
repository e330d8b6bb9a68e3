//! Candidate selector: regular files matching an include pattern, matching no
//! exclude pattern, and absent from the protection set.
//!
//! Candidates keep the walker's order and are never re-sorted, so two
//! selections over an unchanged tree are identical.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

use crate::core::errors::{Result, SweepError};
use crate::core::paths::serialize_lossy;
use crate::protection::ProtectionSet;
use crate::scanner::glob::PatternSet;
use crate::scanner::walker::FileNode;

/// Why an included file is eligible.
pub const REASON_UNPROTECTED: &str = "not tracked, not referenced, not allowlisted";

/// A file proposed for removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    #[serde(serialize_with = "serialize_lossy")]
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Walk-time mtime, re-checked before archiving and before mutation.
    #[serde(skip)]
    pub modified: SystemTime,
    pub matched_pattern: String,
    pub reason: &'static str,
}

impl Candidate {
    /// Fails with `ProtectionViolation` if `node` is protected.
    pub fn new(node: &FileNode, matched_pattern: &str, protection: &ProtectionSet) -> Result<Self> {
        if protection.contains(&node.path) {
            return Err(SweepError::ProtectionViolation {
                path: node.path.clone(),
            });
        }
        Ok(Self {
            path: node.path.clone(),
            size_bytes: node.size_bytes,
            modified: node.modified,
            matched_pattern: matched_pattern.to_string(),
            reason: REASON_UNPROTECTED,
        })
    }
}

/// Select candidates from walked `nodes`.
///
/// Include patterns are matched against the path itself; exclude patterns
/// also match through ancestors, so excluding a directory excludes its
/// subtree.
pub fn select(
    nodes: &[FileNode],
    protection: &ProtectionSet,
    include: &PatternSet,
    exclude: &PatternSet,
) -> Result<Vec<Candidate>> {
    nodes
        .iter()
        .filter(|node| !node.is_dir)
        .filter(|node| !exclude.matches_self_or_ancestor(&node.path))
        .filter(|node| !protection.contains(&node.path))
        .filter_map(|node| {
            include
                .first_match(&node.path)
                .map(|pattern| Candidate::new(node, pattern.as_str(), protection))
        })
        .collect()
}

/// Total bytes across `candidates`.
pub fn total_bytes(candidates: &[Candidate]) -> u64 {
    candidates.iter().map(|c| c.size_bytes).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn node(path: &str, is_dir: bool, size: u64) -> FileNode {
        FileNode {
            path: PathBuf::from(path),
            is_dir,
            size_bytes: size,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    fn patterns(p: &[&str]) -> PatternSet {
        PatternSet::new(p).unwrap()
    }

    fn protected(paths: &[&str]) -> ProtectionSet {
        ProtectionSet::build(
            paths.iter().map(PathBuf::from).collect(),
            BTreeSet::new(),
            BTreeSet::new(),
        )
    }

    #[test]
    fn selects_unprotected_included_files_in_walk_order() {
        let nodes = vec![
            node("__pycache__", true, 0),
            node("__pycache__/b.pyc", false, 3),
            node("app.py", false, 10),
            node("old_cache.pyc", false, 5),
        ];
        let got = select(
            &nodes,
            &ProtectionSet::default(),
            &patterns(&["*.pyc", "**/__pycache__/**"]),
            &patterns(&[]),
        )
        .unwrap();
        let paths: Vec<_> = got.iter().map(|c| c.path.to_string_lossy().into_owned()).collect();
        assert_eq!(paths, vec!["__pycache__/b.pyc", "old_cache.pyc"]);
        assert_eq!(got[0].matched_pattern, "*.pyc");
        assert_eq!(got[1].reason, REASON_UNPROTECTED);
        assert_eq!(total_bytes(&got), 8);
    }

    #[test]
    fn directories_are_never_candidates() {
        let nodes = vec![node("build.o", true, 0)];
        let got = select(&nodes, &ProtectionSet::default(), &patterns(&["*.o"]), &patterns(&[]))
            .unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn protected_and_excluded_files_are_skipped() {
        let nodes = vec![
            node("keep.pyc", false, 1),
            node("vendor/lib.pyc", false, 1),
            node("legacy/x.pyc", false, 1),
            node("drop.pyc", false, 1),
        ];
        let got = select(
            &nodes,
            &protected(&["keep.pyc", "legacy"]),
            &patterns(&["*.pyc"]),
            &patterns(&["vendor"]),
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].path, PathBuf::from("drop.pyc"));
    }

    #[test]
    fn constructing_a_protected_candidate_fails() {
        let err = Candidate::new(&node("keep.pyc", false, 1), "*.pyc", &protected(&["keep.pyc"]))
            .unwrap_err();
        assert_eq!(err.code(), "RSW-2001");
    }

    #[test]
    fn serialized_candidate_omits_mtime() {
        let c = Candidate::new(&node("a.pyc", false, 4), "*.pyc", &ProtectionSet::default()).unwrap();
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["path"], "a.pyc");
        assert_eq!(json["matched_pattern"], "*.pyc");
        assert!(json.get("modified").is_none());
    }
}
