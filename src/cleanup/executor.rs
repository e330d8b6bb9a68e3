//! Cleanup executor: a typestate machine with two terminal modes.
//!
//! ```text
//! Planned ──report()──────────────────────────────▶ Reported   (dry-run)
//! Planned ──archived(VerifiedManifest)──▶ Archived ──apply()──▶ Applied
//! ```
//!
//! `Archived` can only be built from a `VerifiedManifest`, so there is no way
//! to reach `apply()` without an archive that was written and re-read.
//!
//! Apply pre-flight per candidate:
//! 1. Skipped by the archiver -> failed, nothing touched
//! 2. Still present (else `CandidateVanished`)
//! 3. Size and mtime equal the archived entry (else `CandidateChanged`)
//!
//! A failure is recorded and the pass continues; nothing is retried.
//! Directories emptied by the pass are reported, never removed.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cleanup::archive::{VerifiedManifest, snapshot_drift};
use crate::cleanup::selector::Candidate;
use crate::core::errors::{Result, SweepError};
use crate::core::paths::{resolve_absolute_path, serialize_lossy, serialize_lossy_opt};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

// ──────────────────── action types ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Reported,
    Deleted,
    MovedToArchive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Failed { code: String, reason: String },
}

impl Outcome {
    fn failed(err: &SweepError) -> Self {
        Self::Failed {
            code: err.code().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// One step taken (or proposed) for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupAction {
    #[serde(serialize_with = "serialize_lossy")]
    pub path: PathBuf,
    pub operation: Operation,
    /// Wall-clock time of the mutation; absent for reported actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub outcome: Outcome,
    /// Quarantine location for moved files.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(serialize_with = "serialize_lossy_opt")]
    pub destination: Option<PathBuf>,
}

/// Where applied candidates go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisposalTarget {
    Delete,
    /// Move under this directory, keeping the root-relative layout.
    Quarantine(PathBuf),
}

// ──────────────────── states ────────────────────

/// Entry state: candidates selected, nothing archived or mutated.
#[derive(Debug, Clone)]
pub struct Planned {
    root: PathBuf,
    candidates: Vec<Candidate>,
}

/// Terminal dry-run state.
#[derive(Debug, Clone)]
pub struct Reported {
    pub actions: Vec<CleanupAction>,
}

/// Candidates with a verified backup; the only state that can mutate.
#[derive(Debug)]
pub struct Archived {
    root: PathBuf,
    candidates: Vec<Candidate>,
    manifest: VerifiedManifest,
}

/// Terminal apply state.
#[derive(Debug)]
pub struct Applied {
    pub actions: Vec<CleanupAction>,
    pub emptied_dirs: Vec<PathBuf>,
    pub manifest: VerifiedManifest,
}

impl Applied {
    pub fn failed_count(&self) -> usize {
        self.actions.iter().filter(|a| !a.outcome.is_ok()).count()
    }
}

impl Planned {
    pub fn new(root: &Path, candidates: Vec<Candidate>) -> Self {
        Self {
            root: resolve_absolute_path(root),
            candidates,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Dry-run: one `reported` action per candidate, no filesystem access.
    pub fn report(self) -> Reported {
        Reported {
            actions: self
                .candidates
                .into_iter()
                .map(|c| CleanupAction {
                    path: c.path,
                    operation: Operation::Reported,
                    timestamp: None,
                    outcome: Outcome::Ok,
                    destination: None,
                })
                .collect(),
        }
    }

    /// Pair the plan with its backup. The manifest must have been written
    /// for this plan's root.
    pub fn archived(self, manifest: VerifiedManifest) -> Result<Archived> {
        if manifest.manifest().root != self.root {
            return Err(SweepError::ManifestInvalid {
                path: manifest.manifest_path().to_path_buf(),
                details: format!(
                    "manifest root {} does not match run root {}",
                    manifest.manifest().root.display(),
                    self.root.display()
                ),
            });
        }
        Ok(Archived {
            root: self.root,
            candidates: self.candidates,
            manifest,
        })
    }
}

impl Archived {
    pub fn manifest(&self) -> &VerifiedManifest {
        &self.manifest
    }

    /// Dispose of every archived candidate in candidate order.
    pub fn apply(self, target: &DisposalTarget, logger: &ActivityLoggerHandle) -> Applied {
        let quarantine_root = match target {
            DisposalTarget::Delete => None,
            DisposalTarget::Quarantine(dir) => Some(run_quarantine_dir(dir, &self.manifest)),
        };

        let mut actions = Vec::with_capacity(self.candidates.len());
        let mut touched_parents = BTreeSet::new();

        for candidate in &self.candidates {
            let action = self.apply_one(candidate, quarantine_root.as_deref());
            match &action.outcome {
                Outcome::Ok => {
                    if let Some(parent) = candidate.path.parent() {
                        touched_parents.insert(parent.to_path_buf());
                    }
                    logger.send(match &action.destination {
                        Some(destination) => ActivityEvent::FileQuarantined {
                            path: candidate.path.clone(),
                            destination: destination.clone(),
                            size_bytes: candidate.size_bytes,
                        },
                        None => ActivityEvent::FileDeleted {
                            path: candidate.path.clone(),
                            size_bytes: candidate.size_bytes,
                        },
                    });
                }
                Outcome::Failed { code, reason } => logger.send(ActivityEvent::ActionFailed {
                    path: candidate.path.clone(),
                    code: code.clone(),
                    message: reason.clone(),
                }),
            }
            actions.push(action);
        }

        let emptied_dirs = emptied_directories(&self.root, &touched_parents);
        Applied {
            actions,
            emptied_dirs,
            manifest: self.manifest,
        }
    }

    fn apply_one(&self, candidate: &Candidate, quarantine_root: Option<&Path>) -> CleanupAction {
        let operation = if quarantine_root.is_some() {
            Operation::MovedToArchive
        } else {
            Operation::Deleted
        };
        let action = |outcome: Outcome, destination: Option<PathBuf>| CleanupAction {
            path: candidate.path.clone(),
            operation,
            timestamp: Some(Utc::now()),
            outcome,
            destination,
        };

        let manifest = self.manifest.manifest();
        if let Some(skipped) = manifest.skipped_entry(&candidate.path) {
            return action(
                Outcome::Failed {
                    code: skipped.code.clone(),
                    reason: skipped.reason.clone(),
                },
                None,
            );
        }
        let Some(entry) = manifest.entry(&candidate.path) else {
            let err = SweepError::CandidateChanged {
                path: candidate.path.clone(),
                details: "not present in the backup manifest".to_string(),
            };
            return action(Outcome::failed(&err), None);
        };

        let absolute = self.root.join(&candidate.path);
        let meta = match fs::symlink_metadata(&absolute) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let err = SweepError::CandidateVanished {
                    path: candidate.path.clone(),
                };
                return action(Outcome::failed(&err), None);
            }
            Err(e) => return action(Outcome::failed(&SweepError::io(&candidate.path, e)), None),
        };
        let archived_mtime = SystemTime::from(entry.modified);
        if let Some(details) = snapshot_drift(entry.size_bytes, archived_mtime, &meta) {
            let err = SweepError::CandidateChanged {
                path: candidate.path.clone(),
                details,
            };
            return action(Outcome::failed(&err), None);
        }

        match quarantine_root {
            None => match fs::remove_file(&absolute) {
                Ok(()) => action(Outcome::Ok, None),
                Err(e) => action(Outcome::failed(&SweepError::io(&candidate.path, e)), None),
            },
            Some(quarantine) => {
                let destination = quarantine.join(&candidate.path);
                match move_file(&absolute, &destination) {
                    Ok(()) => action(Outcome::Ok, Some(destination)),
                    Err(err) => action(Outcome::failed(&err), None),
                }
            }
        }
    }
}

/// Per-run quarantine subdirectory named after the archive.
fn run_quarantine_dir(base: &Path, manifest: &VerifiedManifest) -> PathBuf {
    let stem = manifest
        .archive_path()
        .file_name()
        .map(|name| name.to_string_lossy().trim_end_matches(".tar.gz").to_string())
        .unwrap_or_else(|| "rsweep".to_string());
    base.join(stem)
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
    }
    if fs::symlink_metadata(destination).is_ok() {
        return Err(SweepError::io(
            destination,
            std::io::Error::new(ErrorKind::AlreadyExists, "quarantine destination exists"),
        ));
    }
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(source, destination).map_err(|e| SweepError::io(destination, e))?;
            fs::remove_file(source).map_err(|e| {
                let _ = fs::remove_file(destination);
                SweepError::io(source, e)
            })
        }
    }
}

/// Root-relative directories (and their ancestors) left empty by the pass.
fn emptied_directories(root: &Path, touched_parents: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    let mut emptied = BTreeSet::new();
    for parent in touched_parents {
        let mut current = Some(parent.as_path());
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() || emptied.contains(dir) {
                break;
            }
            if !dir_is_empty_ignoring(&root.join(dir), &emptied, root) {
                break;
            }
            emptied.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }
    emptied.into_iter().collect()
}

/// Empty, or containing only directories already known to be emptied.
fn dir_is_empty_ignoring(dir: &Path, emptied: &BTreeSet<PathBuf>, root: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().all(|entry| {
        entry
            .path()
            .strip_prefix(root)
            .is_ok_and(|relative| emptied.contains(relative))
    })
}
