//! Deterministic, lazy filesystem walker.
//!
//! Depth-first, each directory's entries sorted by name, which yields nodes in
//! `Path` order (component-wise lexicographic). Symlinks are never followed:
//! they are neither yielded nor descended into, so the walk cannot cycle or
//! escape the root. Entries that cannot be read produce a `WalkWarning` and
//! are skipped.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::errors::{Result, SweepError};
use crate::core::paths::resolve_absolute_path;
use crate::scanner::glob::PatternSet;

/// One walked path, snapshot at walk time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Root-relative, normalized.
    pub path: PathBuf,
    pub is_dir: bool,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// A recoverable walk failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkWarning {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkItem {
    Node(FileNode),
    Warning(WalkWarning),
}

/// Walker over one root. Stateless: every `iter()` starts a fresh walk.
#[derive(Debug, Clone)]
pub struct FileWalker {
    root: PathBuf,
    exclusions: PatternSet,
    excluded_dirs: HashSet<PathBuf>,
}

impl FileWalker {
    /// Fails with `MissingRoot` when `root` is not an existing directory.
    pub fn new(root: &Path, exclusions: PatternSet) -> Result<Self> {
        let root = resolve_absolute_path(root);
        if !root.is_dir() {
            return Err(SweepError::MissingRoot { path: root });
        }
        Ok(Self {
            root,
            exclusions,
            excluded_dirs: HashSet::new(),
        })
    }

    /// Never descend into `dir` (absolute). Used for backup and quarantine
    /// destinations that live under the root.
    #[must_use]
    pub fn exclude_dir(mut self, dir: &Path) -> Self {
        self.excluded_dirs.insert(resolve_absolute_path(dir));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn iter(&self) -> WalkIter<'_> {
        let mut iter = WalkIter {
            walker: self,
            stack: Vec::new(),
            pending_warning: None,
        };
        iter.push_children(&self.root, Path::new(""));
        iter
    }

    /// Run a full walk and split nodes from warnings.
    pub fn snapshot(&self) -> WalkSnapshot {
        let mut snapshot = WalkSnapshot::default();
        for item in self.iter() {
            match item {
                WalkItem::Node(node) => snapshot.nodes.push(node),
                WalkItem::Warning(warning) => snapshot.warnings.push(warning),
            }
        }
        snapshot
    }

    fn is_excluded(&self, relative: &Path, absolute: &Path) -> bool {
        self.excluded_dirs.contains(absolute) || self.exclusions.first_match(relative).is_some()
    }
}

/// A completed walk.
#[derive(Debug, Clone, Default)]
pub struct WalkSnapshot {
    pub nodes: Vec<FileNode>,
    pub warnings: Vec<WalkWarning>,
}

struct Pending {
    absolute: PathBuf,
    relative: PathBuf,
}

/// Lazy walk state: pending entries, smallest name on top.
pub struct WalkIter<'a> {
    walker: &'a FileWalker,
    stack: Vec<Pending>,
    pending_warning: Option<WalkWarning>,
}

impl WalkIter<'_> {
    fn push_children(&mut self, absolute: &Path, relative: &Path) {
        let entries = match fs::read_dir(absolute) {
            Ok(entries) => entries,
            Err(err) => {
                self.pending_warning = Some(WalkWarning {
                    path: relative.to_path_buf(),
                    reason: format!("cannot read directory: {err}"),
                });
                return;
            }
        };

        let mut names: Vec<_> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.file_name()),
                Err(_) => None,
            })
            .collect();
        names.sort_unstable_by(|a, b| b.cmp(a));

        self.stack.extend(names.into_iter().map(|name| Pending {
            absolute: absolute.join(&name),
            relative: relative.join(&name),
        }));
    }
}

impl Iterator for WalkIter<'_> {
    type Item = WalkItem;

    fn next(&mut self) -> Option<WalkItem> {
        if let Some(warning) = self.pending_warning.take() {
            return Some(WalkItem::Warning(warning));
        }

        while let Some(Pending { absolute, relative }) = self.stack.pop() {
            let meta = match fs::symlink_metadata(&absolute) {
                Ok(meta) => meta,
                Err(err) => {
                    return Some(WalkItem::Warning(WalkWarning {
                        path: relative,
                        reason: format!("cannot stat: {err}"),
                    }));
                }
            };

            let file_type = meta.file_type();
            if file_type.is_symlink() || !(file_type.is_dir() || file_type.is_file()) {
                continue;
            }
            if self.walker.is_excluded(&relative, &absolute) {
                continue;
            }

            let node = FileNode {
                path: relative.clone(),
                is_dir: file_type.is_dir(),
                size_bytes: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            };
            if node.is_dir {
                self.push_children(&absolute, &relative);
            }
            return Some(WalkItem::Node(node));
        }
        None
    }
}
