//! Report generator: a pure fold of one run's stage outputs into a
//! serializable `CleanupReport`. Rendering is the caller's job.
//!
//! Dry-run reports carry no wall-clock values, so two dry-runs over an
//! unchanged tree serialize to identical bytes.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cleanup::archive::VerifiedManifest;
use crate::cleanup::executor::CleanupAction;
use crate::cleanup::selector::{Candidate, total_bytes};
use crate::core::errors::Result;
use crate::core::paths::{serialize_lossy, serialize_lossy_opt, serialize_lossy_seq};
use crate::protection::{ProtectionCounts, ProtectionSet};
use crate::scanner::references::{ReferenceRecord, ScanOutput};
use crate::scanner::walker::WalkWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    DryRun,
    Apply,
}

impl RunMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "dry-run",
            Self::Apply => "apply",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub ok: usize,
    pub failed: usize,
}

/// Where the run's backup lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    #[serde(serialize_with = "serialize_lossy")]
    pub archive_path: PathBuf,
    #[serde(serialize_with = "serialize_lossy")]
    pub manifest_path: PathBuf,
    pub archive_sha256: String,
    pub created_at: DateTime<Utc>,
    pub entries: usize,
    pub skipped: usize,
    pub total_bytes: u64,
}

impl From<&VerifiedManifest> for ManifestSummary {
    fn from(verified: &VerifiedManifest) -> Self {
        let manifest = verified.manifest();
        Self {
            archive_path: verified.archive_path().to_path_buf(),
            manifest_path: verified.manifest_path().to_path_buf(),
            archive_sha256: manifest.archive_sha256.clone(),
            created_at: manifest.created_at,
            entries: manifest.entries.len(),
            skipped: manifest.skipped.len(),
            total_bytes: manifest.total_bytes,
        }
    }
}

/// A recoverable problem from any stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportWarning {
    pub stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(serialize_with = "serialize_lossy_opt")]
    pub path: Option<PathBuf>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub endpoint: String,
    pub rule: String,
    pub methods: BTreeSet<String>,
    #[serde(serialize_with = "serialize_lossy")]
    pub source_path: PathBuf,
    pub state_changing_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub mode: RunMode,
    #[serde(serialize_with = "serialize_lossy")]
    pub root: PathBuf,
    pub protected: ProtectionCounts,
    pub sources_scanned: usize,
    pub references: usize,
    pub candidate_count: usize,
    pub candidate_bytes: u64,
    pub candidates: Vec<Candidate>,
    pub actions: Vec<CleanupAction>,
    pub outcomes: OutcomeCounts,
    #[serde(serialize_with = "serialize_lossy_seq")]
    pub emptied_dirs: Vec<PathBuf>,
    pub unresolved: Vec<ReferenceRecord>,
    pub routes: Vec<RouteSummary>,
    pub warnings: Vec<ReportWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_refused: Option<String>,
    pub exit_code: i32,
}

/// Everything a report is folded from; all borrowed, nothing mutated.
pub struct ReportInput<'a> {
    pub mode: RunMode,
    pub root: &'a Path,
    pub protection: &'a ProtectionSet,
    pub scan: &'a ScanOutput,
    pub walk_warnings: &'a [WalkWarning],
    pub vcs_warning: Option<&'a str>,
    pub candidates: &'a [Candidate],
    pub actions: &'a [CleanupAction],
    pub emptied_dirs: &'a [PathBuf],
    pub manifest: Option<&'a VerifiedManifest>,
    pub apply_refused: Option<String>,
    pub exit_code: i32,
}

impl CleanupReport {
    pub fn generate(input: ReportInput<'_>) -> Self {
        let outcomes = input
            .actions
            .iter()
            .fold(OutcomeCounts::default(), |mut acc, action| {
                if action.outcome.is_ok() {
                    acc.ok += 1;
                } else {
                    acc.failed += 1;
                }
                acc
            });

        let mut warnings: Vec<ReportWarning> = input
            .walk_warnings
            .iter()
            .map(|w| ReportWarning {
                stage: "walk",
                path: Some(w.path.clone()),
                reason: w.reason.clone(),
            })
            .collect();
        warnings.extend(input.vcs_warning.map(|reason| ReportWarning {
            stage: "vcs",
            path: None,
            reason: reason.to_string(),
        }));
        warnings.extend(input.scan.warnings.iter().map(|w| ReportWarning {
            stage: "scan",
            path: Some(w.path.clone()),
            reason: w.reason.clone(),
        }));

        Self {
            mode: input.mode,
            root: input.root.to_path_buf(),
            protected: input.protection.counts(),
            sources_scanned: input.scan.sources_scanned,
            references: input.scan.records.len(),
            candidate_count: input.candidates.len(),
            candidate_bytes: total_bytes(input.candidates),
            candidates: input.candidates.to_vec(),
            actions: input.actions.to_vec(),
            outcomes,
            emptied_dirs: input.emptied_dirs.to_vec(),
            unresolved: input.scan.unresolved().cloned().collect(),
            routes: input
                .scan
                .routes
                .iter()
                .map(|r| RouteSummary {
                    endpoint: r.endpoint.clone(),
                    rule: r.rule.clone(),
                    methods: r.methods.clone(),
                    source_path: r.source_path.clone(),
                    state_changing_only: r.state_changing_only(),
                })
                .collect(),
            warnings,
            manifest: input.manifest.map(ManifestSummary::from),
            apply_refused: input.apply_refused,
            exit_code: input.exit_code,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::executor::{Operation, Outcome};
    use crate::scanner::references::ScanWarning;
    use std::time::SystemTime;

    fn candidate(path: &str, size: u64) -> Candidate {
        Candidate {
            path: PathBuf::from(path),
            size_bytes: size,
            modified: SystemTime::UNIX_EPOCH,
            matched_pattern: "*.pyc".to_string(),
            reason: crate::cleanup::selector::REASON_UNPROTECTED,
        }
    }

    fn action(path: &str, outcome: Outcome) -> CleanupAction {
        CleanupAction {
            path: PathBuf::from(path),
            operation: Operation::Deleted,
            timestamp: None,
            outcome,
            destination: None,
        }
    }

    #[test]
    fn counts_and_warnings_are_folded() {
        let protection = ProtectionSet::build(
            [PathBuf::from("a.py")].into(),
            [PathBuf::from("b.html"), PathBuf::from("a.py")].into(),
            BTreeSet::new(),
        );
        let scan = ScanOutput {
            warnings: vec![ScanWarning {
                path: PathBuf::from("app.py"),
                reason: "unparseable: invalid UTF-8".to_string(),
            }],
            sources_scanned: 3,
            ..ScanOutput::default()
        };
        let walk_warnings = vec![WalkWarning {
            path: PathBuf::from("locked"),
            reason: "cannot read directory".to_string(),
        }];
        let candidates = vec![candidate("x.pyc", 10), candidate("y.pyc", 5)];
        let actions = vec![
            action("x.pyc", Outcome::Ok),
            action(
                "y.pyc",
                Outcome::Failed {
                    code: "RSW-4002".to_string(),
                    reason: "gone".to_string(),
                },
            ),
        ];

        let report = CleanupReport::generate(ReportInput {
            mode: RunMode::Apply,
            root: Path::new("/srv/app"),
            protection: &protection,
            scan: &scan,
            walk_warnings: &walk_warnings,
            vcs_warning: Some("not a git repository"),
            candidates: &candidates,
            actions: &actions,
            emptied_dirs: &[],
            manifest: None,
            apply_refused: None,
            exit_code: 2,
        });

        assert_eq!(report.protected.total, 2);
        assert_eq!(report.protected.referenced, 2);
        assert_eq!(report.candidate_bytes, 15);
        assert_eq!(report.outcomes, OutcomeCounts { ok: 1, failed: 1 });
        let stages: Vec<_> = report.warnings.iter().map(|w| w.stage).collect();
        assert_eq!(stages, vec!["walk", "vcs", "scan"]);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["mode"], "apply");
        assert_eq!(json["exit_code"], 2);
        assert!(json.get("manifest").is_none());
        assert!(json.get("apply_refused").is_none());
    }

    #[test]
    fn generation_is_deterministic() {
        let protection = ProtectionSet::default();
        let scan = ScanOutput::default();
        let candidates = vec![candidate("x.pyc", 1)];
        let make = || {
            CleanupReport::generate(ReportInput {
                mode: RunMode::DryRun,
                root: Path::new("/srv/app"),
                protection: &protection,
                scan: &scan,
                walk_warnings: &[],
                vcs_warning: None,
                candidates: &candidates,
                actions: &[],
                emptied_dirs: &[],
                manifest: None,
                apply_refused: Some("archive refused".to_string()),
                exit_code: 3,
            })
            .to_json()
            .unwrap()
        };
        assert_eq!(make(), make());
        assert!(make().contains("\"apply_refused\": \"archive refused\""));
    }
}
