//! Run orchestration: walk -> scan -> protect -> select -> archive -> apply
//! -> report.
//!
//! Cancellation is honored only at stage boundaries. In apply mode the
//! archive stage must produce a `VerifiedManifest` before the executor can
//! run; an archive failure refuses the apply, still returns a report, and
//! exits with `3`.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use crate::cleanup::archive::{BackupArchiver, RestoreReport, VerifiedManifest, restore};
use crate::cleanup::executor::{CleanupAction, DisposalTarget, Planned};
use crate::cleanup::report::{CleanupReport, ReportInput, RunMode};
use crate::cleanup::selector::{Candidate, select, total_bytes};
use crate::core::cancel::CancelToken;
use crate::core::config::{Config, Disposal};
use crate::core::errors::{Result, SweepError};
use crate::core::paths::resolve_absolute_path;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::space::SpaceProbe;
use crate::protection::{Allowlist, ProtectionSet};
use crate::scanner::glob::PatternSet;
use crate::scanner::references::{ReferenceScanner, ScanOutput, ScanSettings};
use crate::scanner::walker::{FileWalker, WalkSnapshot};
use crate::vcs::{GitIndex, StaticTracked, TrackedPathProvider, TrackedPaths};

/// Exit code for an apply run refused at the archive stage.
const ARCHIVE_REFUSED_EXIT: i32 = 3;

/// Everything known about the tree before selection.
#[derive(Debug)]
pub struct Analysis {
    /// Absolute root.
    pub root: PathBuf,
    pub snapshot: WalkSnapshot,
    pub scan: ScanOutput,
    pub tracked: TrackedPaths,
    pub protection: ProtectionSet,
}

/// A finished run.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: CleanupReport,
    pub exit_code: i32,
}

pub struct Pipeline {
    root: PathBuf,
    config: Config,
    mode: RunMode,
    tracked: Box<dyn TrackedPathProvider>,
    space_probe: Option<Box<dyn SpaceProbe>>,
    logger: ActivityLoggerHandle,
    cancel: CancelToken,
}

impl Pipeline {
    /// Dry-run pipeline over `root`; the VCS provider follows `config.vcs`.
    pub fn new(root: &Path, config: Config) -> Self {
        let tracked: Box<dyn TrackedPathProvider> = if config.vcs.enabled {
            Box::new(GitIndex::new(config.vcs.git_binary.clone()))
        } else {
            Box::new(StaticTracked::empty())
        };
        Self {
            root: resolve_absolute_path(root),
            config,
            mode: RunMode::DryRun,
            tracked,
            space_probe: None,
            logger: ActivityLoggerHandle::disabled(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_tracked(mut self, provider: Box<dyn TrackedPathProvider>) -> Self {
        self.tracked = provider;
        self
    }

    #[must_use]
    pub fn with_space_probe(mut self, probe: Box<dyn SpaceProbe>) -> Self {
        self.space_probe = Some(probe);
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Backup directory. Relative config paths (backup, quarantine,
    /// allowlist) all resolve against the root.
    pub fn backup_dir(&self) -> PathBuf {
        self.under_root(&self.config.backup.backup_dir)
    }

    fn quarantine_dir(&self) -> Option<PathBuf> {
        self.config
            .backup
            .quarantine_dir
            .as_deref()
            .map(|dir| self.under_root(dir))
    }

    fn under_root(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Walk, scan and build the protection set.
    pub fn analyze(&self) -> Result<Analysis> {
        self.config.validate()?;
        let allowlist = match &self.config.protect.allowlist_file {
            Some(path) => Allowlist::load(&self.under_root(path), &self.config.protect.patterns)?,
            None => Allowlist::from_patterns(&self.config.protect.patterns)?,
        };

        self.cancel.checkpoint("walk")?;
        let mut walker = FileWalker::new(&self.root, PatternSet::new(&self.config.walk.exclude_patterns)?)?
            .exclude_dir(&self.backup_dir());
        if let Some(quarantine) = self.quarantine_dir() {
            walker = walker.exclude_dir(&quarantine);
        }
        let snapshot = walker.snapshot();
        for warning in &snapshot.warnings {
            self.logger.send(ActivityEvent::ScanWarning {
                path: warning.path.clone(),
                reason: warning.reason.clone(),
            });
        }

        self.cancel.checkpoint("scan")?;
        let scanner = ReferenceScanner::new(ScanSettings::from(&self.config.scan))?;
        let scan = scanner.scan(walker.root(), &snapshot.nodes);
        for warning in &scan.warnings {
            self.logger.send(ActivityEvent::ScanWarning {
                path: warning.path.clone(),
                reason: warning.reason.clone(),
            });
        }
        let tracked = self.tracked.tracked_paths(walker.root());

        self.cancel.checkpoint("protect")?;
        let protection = ProtectionSet::build(
            tracked.paths.clone(),
            scan.referenced_paths(),
            allowlist.evaluate(&snapshot.nodes),
        );
        let counts = protection.counts();
        self.logger.send(ActivityEvent::ProtectionBuilt {
            tracked: counts.tracked,
            referenced: counts.referenced,
            allowlisted: counts.allowlisted,
            unresolved: scan.unresolved().count(),
        });

        Ok(Analysis {
            root: walker.root().to_path_buf(),
            snapshot,
            scan,
            tracked,
            protection,
        })
    }

    /// Run every stage and produce the report.
    pub fn run(mut self) -> Result<RunOutcome> {
        self.logger.send(ActivityEvent::RunStarted {
            root: self.root.clone(),
            mode: self.mode.as_str(),
            config_hash: self.config.stable_hash()?,
        });

        let result = self.run_stages();
        match &result {
            Ok(outcome) => self.logger.send(ActivityEvent::RunCompleted {
                mode: self.mode.as_str(),
                exit_code: outcome.exit_code,
                candidates: outcome.report.candidate_count,
                failed: outcome.report.outcomes.failed,
            }),
            Err(SweepError::Cancelled { stage }) => {
                self.logger.send(ActivityEvent::Cancelled { stage: *stage });
            }
            Err(err) => self.logger.send(ActivityEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
        result
    }

    fn run_stages(&mut self) -> Result<RunOutcome> {
        let analysis = self.analyze()?;

        self.cancel.checkpoint("select")?;
        let include = PatternSet::new(&self.config.select.include_patterns)?;
        let exclude = PatternSet::new(&self.config.select.exclude_patterns)?;
        let candidates = select(&analysis.snapshot.nodes, &analysis.protection, &include, &exclude)?;
        self.logger.send(ActivityEvent::CandidatesSelected {
            count: candidates.len(),
            total_bytes: total_bytes(&candidates),
        });
        let planned = Planned::new(&analysis.root, candidates.clone());

        if self.mode == RunMode::DryRun || candidates.is_empty() {
            let reported = planned.report();
            return Ok(self.finish(&analysis, &candidates, Finished::reported(&reported.actions)));
        }

        self.cancel.checkpoint("archive")?;
        let mut archiver = BackupArchiver::new(self.backup_dir(), self.config.backup.space_margin_bytes);
        if let Some(probe) = self.space_probe.take() {
            archiver = archiver.with_probe(probe);
        }
        let manifest = match archiver.archive(&analysis.root, planned.candidates()) {
            Ok(manifest) => manifest,
            Err(err) => return Ok(self.refuse(&analysis, &candidates, &err)),
        };
        self.logger.send(ActivityEvent::ArchiveWritten {
            archive: manifest.archive_path().to_path_buf(),
            entries: manifest.manifest().entries.len(),
            skipped: manifest.manifest().skipped.len(),
            total_bytes: manifest.manifest().total_bytes,
        });

        self.cancel.checkpoint("apply")?;
        let target = match (self.config.backup.disposal, self.quarantine_dir()) {
            (Disposal::Quarantine, Some(dir)) => DisposalTarget::Quarantine(dir),
            _ => DisposalTarget::Delete,
        };
        let archived = match planned.archived(manifest) {
            Ok(archived) => archived,
            Err(err) => return Ok(self.refuse(&analysis, &candidates, &err)),
        };
        let applied = archived.apply(&target, &self.logger);
        let finished = Finished {
            actions: &applied.actions,
            emptied_dirs: &applied.emptied_dirs,
            manifest: Some(&applied.manifest),
            apply_refused: None,
            exit_code: if applied.failed_count() > 0 { 2 } else { 0 },
        };
        Ok(self.finish(&analysis, &candidates, finished))
    }

    /// Nothing has been mutated yet: report every candidate and exit `3`.
    fn refuse(&self, analysis: &Analysis, candidates: &[Candidate], err: &SweepError) -> RunOutcome {
        self.logger.send(ActivityEvent::ArchiveFailed {
            code: err.code().to_string(),
            message: err.to_string(),
        });
        let reported = Planned::new(&analysis.root, candidates.to_vec()).report();
        let finished = Finished {
            apply_refused: Some(format!("apply refused, no files were changed: {err}")),
            exit_code: ARCHIVE_REFUSED_EXIT,
            ..Finished::reported(&reported.actions)
        };
        self.finish(analysis, candidates, finished)
    }

    fn finish(&self, analysis: &Analysis, candidates: &[Candidate], finished: Finished<'_>) -> RunOutcome {
        let report = CleanupReport::generate(ReportInput {
            mode: self.mode,
            root: &analysis.root,
            protection: &analysis.protection,
            scan: &analysis.scan,
            walk_warnings: &analysis.snapshot.warnings,
            vcs_warning: analysis.tracked.warning.as_deref(),
            candidates,
            actions: finished.actions,
            emptied_dirs: finished.emptied_dirs,
            manifest: finished.manifest,
            apply_refused: finished.apply_refused,
            exit_code: finished.exit_code,
        });
        RunOutcome {
            exit_code: report.exit_code,
            report,
        }
    }
}

/// Executor-stage output handed to the report.
struct Finished<'a> {
    actions: &'a [CleanupAction],
    emptied_dirs: &'a [PathBuf],
    manifest: Option<&'a VerifiedManifest>,
    apply_refused: Option<String>,
    exit_code: i32,
}

impl<'a> Finished<'a> {
    fn reported(actions: &'a [CleanupAction]) -> Self {
        Self {
            actions,
            emptied_dirs: &[],
            manifest: None,
            apply_refused: None,
            exit_code: 0,
        }
    }
}

/// Verify a manifest from disk and re-extract its archive.
///
/// `root` defaults to the root recorded in the manifest.
pub fn restore_from_manifest(
    manifest_path: &Path,
    root: Option<&Path>,
    force: bool,
    logger: &ActivityLoggerHandle,
) -> Result<RestoreReport> {
    let verified = VerifiedManifest::verify_from_disk(manifest_path)?;
    let root = root.map_or_else(|| verified.manifest().root.clone(), resolve_absolute_path);
    let report = restore(&verified, &root, force)?;
    logger.send(ActivityEvent::RestoreCompleted {
        archive: report.archive_path.clone(),
        restored: report.restored.len(),
        skipped: report.skipped_existing.len(),
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::space::FixedSpaceProbe;
    use std::fs;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn config(backup: &Path) -> Config {
        let mut config = Config::default();
        config.vcs.enabled = false;
        config.scan.parallelism = 2;
        config.backup.backup_dir = backup.to_path_buf();
        config.backup.space_margin_bytes = 0;
        config
    }

    #[test]
    fn dry_run_selects_without_mutating() {
        let tree = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        write(tree.path(), "app.py", "import helpers\n");
        write(tree.path(), "helpers.py", "X = 1\n");
        write(tree.path(), "old_cache.pyc", "\0\0");

        let outcome = Pipeline::new(tree.path(), config(backup.path())).run().unwrap();
        assert_eq!(outcome.exit_code, 0);
        let paths: Vec<_> = outcome.report.candidates.iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("old_cache.pyc")]);
        assert!(tree.path().join("old_cache.pyc").exists());
        assert_eq!(fs::read_dir(backup.path()).unwrap().count(), 0);
    }

    #[test]
    fn apply_with_no_candidates_skips_the_archive() {
        let tree = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        write(tree.path(), "app.py", "print('hi')\n");

        let outcome = Pipeline::new(tree.path(), config(backup.path()))
            .with_mode(RunMode::Apply)
            .run()
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.report.manifest.is_none());
        assert_eq!(fs::read_dir(backup.path()).unwrap().count(), 0);
    }

    #[test]
    fn archive_failure_refuses_apply() {
        let tree = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        write(tree.path(), "old_cache.pyc", "bytecode");

        let outcome = Pipeline::new(tree.path(), config(backup.path()))
            .with_mode(RunMode::Apply)
            .with_space_probe(Box::new(FixedSpaceProbe(0)))
            .run()
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.report.apply_refused.is_some());
        assert_eq!(outcome.report.candidate_count, 1);
        assert!(tree.path().join("old_cache.pyc").exists());
    }

    #[test]
    fn backup_dir_inside_root_is_never_walked() {
        let tree = tempfile::tempdir().unwrap();
        write(tree.path(), "old_cache.pyc", "bytecode");
        let mut cfg = config(Path::new("backups"));
        cfg.select.include_patterns.push("*.tar.gz".to_string());

        let first = Pipeline::new(tree.path(), cfg.clone())
            .with_mode(RunMode::Apply)
            .with_space_probe(Box::new(FixedSpaceProbe(u64::MAX)))
            .run()
            .unwrap();
        assert_eq!(first.exit_code, 0);
        assert!(tree.path().join("backups").is_dir());

        let second = Pipeline::new(tree.path(), cfg).run().unwrap();
        assert_eq!(second.report.candidate_count, 0);
    }

    #[test]
    fn cancellation_stops_before_the_next_stage() {
        let tree = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        write(tree.path(), "old_cache.pyc", "bytecode");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = Pipeline::new(tree.path(), config(backup.path()))
            .with_mode(RunMode::Apply)
            .with_cancel(cancel)
            .run()
            .unwrap_err();
        assert_eq!(err.exit_code(), 130);
        assert!(tree.path().join("old_cache.pyc").exists());
    }

    #[test]
    fn missing_allowlist_fails_before_walking() {
        let tree = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        let mut cfg = config(backup.path());
        cfg.protect.allowlist_file = Some(tree.path().join("no-such-allowlist"));

        let err = Pipeline::new(tree.path(), cfg).run().unwrap_err();
        assert_eq!(err.code(), "RSW-1006");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn restore_round_trips_an_apply_run() {
        let tree = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        write(tree.path(), "old_cache.pyc", "bytecode");

        let outcome = Pipeline::new(tree.path(), config(backup.path()))
            .with_mode(RunMode::Apply)
            .with_space_probe(Box::new(FixedSpaceProbe(u64::MAX)))
            .run()
            .unwrap();
        assert!(!tree.path().join("old_cache.pyc").exists());
        let manifest_path = outcome.report.manifest.unwrap().manifest_path;

        let restored =
            restore_from_manifest(&manifest_path, None, false, &ActivityLoggerHandle::disabled())
                .unwrap();
        assert_eq!(restored.restored, vec![PathBuf::from("old_cache.pyc")]);
        assert_eq!(fs::read_to_string(tree.path().join("old_cache.pyc")).unwrap(), "bytecode");
    }

    #[test]
    fn relative_allowlist_resolves_against_the_root() {
        let tree = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        write(tree.path(), "old_cache.pyc", "bytecode");
        write(tree.path(), "ops/keep.txt", "old_cache.pyc\n");
        let mut cfg = config(backup.path());
        cfg.protect.allowlist_file = Some(PathBuf::from("ops/keep.txt"));

        let outcome = Pipeline::new(tree.path(), cfg).run().unwrap();
        assert_eq!(outcome.report.candidate_count, 0);
        assert_eq!(outcome.report.protected.allowlisted, 1);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_candidate_is_archived_and_removed() {
        use crate::core::paths::path_from_bytes;

        let tree = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        let name = path_from_bytes(b"cache_\xff.pyc");
        fs::write(tree.path().join(&name), b"bytecode").unwrap();

        let outcome = Pipeline::new(tree.path(), config(backup.path()))
            .with_mode(RunMode::Apply)
            .with_space_probe(Box::new(FixedSpaceProbe(u64::MAX)))
            .run()
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.report.candidates[0].path, name);
        assert!(!tree.path().join(&name).exists());
        let json = outcome.report.to_json().unwrap();
        assert!(json.contains("cache_\u{fffd}.pyc"));
    }
}
