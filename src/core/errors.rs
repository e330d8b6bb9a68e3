//! RSW-prefixed error types with structured error codes and exit-code mapping.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SweepError>;

/// Top-level error type for repo_sweep.
///
/// Code ranges: `1xxx` configuration (fatal, pre-run), `2xxx` scan and
/// protection, `3xxx` archive (fatal to apply mode only), `4xxx`
/// per-candidate I/O (non-fatal), `9xxx` runtime.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("[RSW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[RSW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[RSW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[RSW-1004] invalid glob pattern {pattern:?}: {details}")]
    InvalidGlob { pattern: String, details: String },

    #[error("[RSW-1005] root directory does not exist or is not a directory: {path}")]
    MissingRoot { path: PathBuf },

    #[error("[RSW-1006] allowlist file not found: {path}")]
    MissingAllowlist { path: PathBuf },

    #[error("[RSW-2001] protected path offered as a candidate: {path}")]
    ProtectionViolation { path: PathBuf },

    #[error("[RSW-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[RSW-3001] insufficient space in {path}: need {required} bytes, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("[RSW-3002] archive write failure at {path}: {details}")]
    ArchiveWrite { path: PathBuf, details: String },

    #[error("[RSW-3003] checksum mismatch for {path} in archive: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("[RSW-3004] manifest at {path} is invalid: {details}")]
    ManifestInvalid { path: PathBuf, details: String },

    #[error("[RSW-4001] {path} changed since it was walked: {details}")]
    CandidateChanged { path: PathBuf, details: String },

    #[error("[RSW-4002] {path} vanished before it could be processed")]
    CandidateVanished { path: PathBuf },

    #[error("[RSW-4003] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[RSW-9001] run cancelled before stage {stage}")]
    Cancelled { stage: &'static str },

    #[error("[RSW-9900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SweepError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RSW-1001",
            Self::MissingConfig { .. } => "RSW-1002",
            Self::ConfigParse { .. } => "RSW-1003",
            Self::InvalidGlob { .. } => "RSW-1004",
            Self::MissingRoot { .. } => "RSW-1005",
            Self::MissingAllowlist { .. } => "RSW-1006",
            Self::ProtectionViolation { .. } => "RSW-2001",
            Self::Serialization { .. } => "RSW-2101",
            Self::InsufficientSpace { .. } => "RSW-3001",
            Self::ArchiveWrite { .. } => "RSW-3002",
            Self::ChecksumMismatch { .. } => "RSW-3003",
            Self::ManifestInvalid { .. } => "RSW-3004",
            Self::CandidateChanged { .. } => "RSW-4001",
            Self::CandidateVanished { .. } => "RSW-4002",
            Self::Io { .. } => "RSW-4003",
            Self::Cancelled { .. } => "RSW-9001",
            Self::Runtime { .. } => "RSW-9900",
        }
    }

    /// Whether this error belongs to the configuration class (fatal, pre-run).
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::InvalidGlob { .. }
                | Self::MissingRoot { .. }
                | Self::MissingAllowlist { .. }
        )
    }

    /// Whether this error belongs to the archive class (refuses apply mode).
    #[must_use]
    pub const fn is_archive(&self) -> bool {
        matches!(
            self,
            Self::InsufficientSpace { .. }
                | Self::ArchiveWrite { .. }
                | Self::ChecksumMismatch { .. }
                | Self::ManifestInvalid { .. }
        )
    }

    /// Process exit code for a run that terminated with this error.
    ///
    /// `0` success, `1` configuration, `2` partial apply failure, `3` archive
    /// refused, `130` cancelled by signal.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled { .. } => 130,
            _ if self.is_configuration() => 1,
            _ if self.is_archive() => 3,
            _ => 2,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap an IO error raised while producing the archive.
    #[must_use]
    pub fn archive_write(path: impl AsRef<Path>, source: &std::io::Error) -> Self {
        Self::ArchiveWrite {
            path: path.as_ref().to_path_buf(),
            details: source.to_string(),
        }
    }
}

impl From<serde_json::Error> for SweepError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SweepError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_errors() -> Vec<SweepError> {
        vec![
            SweepError::InvalidConfig {
                details: String::new(),
            },
            SweepError::MissingConfig {
                path: PathBuf::new(),
            },
            SweepError::ConfigParse {
                context: "",
                details: String::new(),
            },
            SweepError::InvalidGlob {
                pattern: String::new(),
                details: String::new(),
            },
            SweepError::MissingRoot {
                path: PathBuf::new(),
            },
            SweepError::MissingAllowlist {
                path: PathBuf::new(),
            },
            SweepError::ProtectionViolation {
                path: PathBuf::new(),
            },
            SweepError::Serialization {
                context: "",
                details: String::new(),
            },
            SweepError::InsufficientSpace {
                path: PathBuf::new(),
                required: 0,
                available: 0,
            },
            SweepError::ArchiveWrite {
                path: PathBuf::new(),
                details: String::new(),
            },
            SweepError::ChecksumMismatch {
                path: PathBuf::new(),
                expected: String::new(),
                actual: String::new(),
            },
            SweepError::ManifestInvalid {
                path: PathBuf::new(),
                details: String::new(),
            },
            SweepError::CandidateChanged {
                path: PathBuf::new(),
                details: String::new(),
            },
            SweepError::CandidateVanished {
                path: PathBuf::new(),
            },
            SweepError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            SweepError::Cancelled { stage: "" },
            SweepError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = sample_errors();
        let codes: Vec<&str> = errors.iter().map(SweepError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_includes_code() {
        for err in sample_errors() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
        }
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(
            SweepError::InvalidGlob {
                pattern: "x".to_string(),
                details: String::new()
            }
            .exit_code(),
            1
        );
        assert_eq!(
            SweepError::MissingRoot {
                path: PathBuf::from("/nope")
            }
            .exit_code(),
            1
        );
        assert_eq!(
            SweepError::ChecksumMismatch {
                path: PathBuf::new(),
                expected: "a".to_string(),
                actual: "b".to_string(),
            }
            .exit_code(),
            3
        );
        assert_eq!(
            SweepError::InsufficientSpace {
                path: PathBuf::new(),
                required: 10,
                available: 1,
            }
            .exit_code(),
            3
        );
        assert_eq!(
            SweepError::CandidateVanished {
                path: PathBuf::new()
            }
            .exit_code(),
            2
        );
        assert_eq!(SweepError::Cancelled { stage: "archive" }.exit_code(), 130);
    }

    #[test]
    fn configuration_and_archive_classes_are_disjoint() {
        for err in sample_errors() {
            assert!(
                !(err.is_configuration() && err.is_archive()),
                "{} is in two classes",
                err.code()
            );
        }
    }

    #[test]
    fn io_convenience_constructor() {
        let err = SweepError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "RSW-4003");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SweepError = json_err.into();
        assert_eq!(err.code(), "RSW-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: SweepError = toml_err.into();
        assert_eq!(err.code(), "RSW-1003");
        assert_eq!(err.exit_code(), 1);
    }
}
