//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use repo_sweep::prelude::*;
//! ```

// Core
pub use crate::core::cancel::CancelToken;
pub use crate::core::config::{Config, Disposal};
pub use crate::core::errors::{Result, SweepError};

// Scanner
pub use crate::scanner::extractors::ReferenceKind;
pub use crate::scanner::glob::{GlobPattern, PatternSet};
pub use crate::scanner::references::{ReferenceRecord, ReferenceScanner, ScanOutput, ScanSettings};
pub use crate::scanner::routes::Route;
pub use crate::scanner::walker::{FileNode, FileWalker, WalkSnapshot};

// Protection
pub use crate::protection::{Allowlist, ProtectionOrigin, ProtectionSet};
pub use crate::vcs::{GitIndex, StaticTracked, TrackedPathProvider, TrackedPaths};

// Cleanup
pub use crate::cleanup::archive::{BackupArchiver, BackupManifest, RestoreReport, VerifiedManifest};
pub use crate::cleanup::executor::{CleanupAction, DisposalTarget, Operation, Outcome, Planned};
pub use crate::cleanup::report::{CleanupReport, RunMode};
pub use crate::cleanup::selector::{Candidate, select};

// Pipeline
pub use crate::pipeline::{Analysis, Pipeline, RunOutcome, restore_from_manifest};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
pub use crate::logger::jsonl::JsonlConfig;

// Platform
pub use crate::platform::space::{FixedSpaceProbe, FsSpaceProbe, SpaceProbe};
