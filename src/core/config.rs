//! Configuration system: TOML file + env var overrides + smart defaults.
//!
//! Precedence, lowest to highest: built-in defaults, the config file, `RSW_*`
//! environment variables, then CLI flags (applied by the binary).

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SweepError};
use crate::scanner::glob::PatternSet;

/// File name looked up in the scanned root before the per-user config.
pub const ROOT_CONFIG_FILENAME: &str = ".rsweep.toml";

/// Full repo_sweep configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub walk: WalkConfig,
    pub scan: ScanConfig,
    pub select: SelectConfig,
    pub protect: ProtectConfig,
    pub backup: BackupConfig,
    pub vcs: VcsConfig,
    pub log: LogConfig,
}

/// Filesystem walk exclusions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WalkConfig {
    /// Globs whose matching directories are pruned from the walk entirely.
    pub exclude_patterns: Vec<String>,
}

/// Reference scanner knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    /// Root-relative directories template names resolve against.
    pub template_roots: Vec<PathBuf>,
    /// Root-relative directories static-asset names resolve against.
    pub static_roots: Vec<PathBuf>,
    /// Extensions (without dot) treated as source-like.
    pub source_extensions: Vec<String>,
    /// Source files above this size are skipped with a warning.
    pub max_source_bytes: u64,
    pub parallelism: usize,
    /// Enable the route simulator.
    pub route_scan: bool,
}

/// Candidate selection patterns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectConfig {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

/// Operator-declared critical paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ProtectConfig {
    /// Allowlist file, one glob per line.
    pub allowlist_file: Option<PathBuf>,
    /// Inline allowlist globs, merged with the file.
    pub patterns: Vec<String>,
}

/// What happens to a candidate once it is archived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Disposal {
    #[default]
    Delete,
    Quarantine,
}

impl Disposal {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "delete" => Some(Self::Delete),
            "quarantine" => Some(Self::Quarantine),
            _ => None,
        }
    }
}

/// Backup archive destination and disposal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    /// Archive destination; relative paths resolve against the scanned root.
    pub backup_dir: PathBuf,
    pub disposal: Disposal,
    /// Required when `disposal = "quarantine"`.
    pub quarantine_dir: Option<PathBuf>,
    /// Extra free space demanded on top of the candidates' total size.
    pub space_margin_bytes: u64,
}

/// Version-control integration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VcsConfig {
    pub enabled: bool,
    pub git_binary: String,
}

/// Activity log destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LogConfig {
    /// JSONL activity log; `None` disables file logging.
    pub jsonl_path: Option<PathBuf>,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: [".git", ".hg", ".svn", ".bzr", "node_modules"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            template_roots: vec![PathBuf::from("templates")],
            static_roots: vec![PathBuf::from("static")],
            source_extensions: [
                "py", "pyi", "html", "htm", "jinja", "jinja2", "j2", "js", "mjs", "cjs", "jsx",
                "ts", "tsx", "vue", "css", "scss", "less", "json", "toml", "yaml", "yml", "ini",
                "cfg", "conf", "txt", "md", "rst", "sh", "xml",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            max_source_bytes: 2 * 1024 * 1024,
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            route_scan: false,
        }
    }
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            include_patterns: [
                "*.pyc",
                "*.pyo",
                "**/__pycache__/**",
                "**/.pytest_cache/**",
                "**/.mypy_cache/**",
                "**/.ruff_cache/**",
                "**/*.egg-info/**",
                "**/.sass-cache/**",
                "*.o",
                "*.obj",
                "*.class",
                "*.tmp",
                "*.swp",
                ".DS_Store",
                "Thumbs.db",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_data_dir().join("backups"),
            disposal: Disposal::Delete,
            quarantine_dir: None,
            space_margin_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            git_binary: "git".to_string(),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[RSW-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn default_data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("rsweep")
}

impl Config {
    /// Per-user configuration path.
    #[must_use]
    pub fn user_config_path() -> PathBuf {
        home_dir().join(".config").join("rsweep").join("config.toml")
    }

    /// Load config, then apply env overrides and validate.
    ///
    /// An explicit path must exist. Otherwise `<root>/.rsweep.toml` is tried,
    /// then the per-user config, then built-in defaults.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        let source = match explicit {
            Some(path) if !path.exists() => {
                return Err(SweepError::MissingConfig {
                    path: path.to_path_buf(),
                });
            }
            Some(path) => Some(path.to_path_buf()),
            None => [root.join(ROOT_CONFIG_FILENAME), Self::user_config_path()]
                .into_iter()
                .find(|candidate| candidate.is_file()),
        };

        let mut cfg = match source {
            Some(path) => {
                let raw = fs::read_to_string(&path).map_err(|e| SweepError::ConfigParse {
                    context: "read",
                    details: format!("{}: {e}", path.display()),
                })?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };

        cfg.apply_env_overrides_from(|name| env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Apply `RSW_*` overrides read through `get` (injectable for tests).
    pub fn apply_env_overrides_from<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| get(name).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = get("RSW_WALK_EXCLUDE") {
            self.walk.exclude_patterns = split_list(&raw);
        }

        if let Some(raw) = get("RSW_SCAN_TEMPLATE_ROOTS") {
            self.scan.template_roots = split_list(&raw).into_iter().map(PathBuf::from).collect();
        }
        if let Some(raw) = get("RSW_SCAN_STATIC_ROOTS") {
            self.scan.static_roots = split_list(&raw).into_iter().map(PathBuf::from).collect();
        }
        if let Some(raw) = get("RSW_SCAN_MAX_SOURCE_BYTES") {
            self.scan.max_source_bytes = parse_env("RSW_SCAN_MAX_SOURCE_BYTES", &raw)?;
        }
        if let Some(raw) = get("RSW_SCAN_PARALLELISM") {
            self.scan.parallelism = parse_env("RSW_SCAN_PARALLELISM", &raw)?;
        }
        if let Some(raw) = get("RSW_SCAN_ROUTE_SCAN") {
            self.scan.route_scan = parse_env("RSW_SCAN_ROUTE_SCAN", &raw)?;
        }

        if let Some(raw) = get("RSW_SELECT_INCLUDE") {
            self.select.include_patterns = split_list(&raw);
        }
        if let Some(raw) = get("RSW_SELECT_EXCLUDE") {
            self.select.exclude_patterns = split_list(&raw);
        }

        if let Some(raw) = get("RSW_PROTECT_ALLOWLIST_FILE") {
            self.protect.allowlist_file = Some(PathBuf::from(raw));
        }

        if let Some(raw) = get("RSW_BACKUP_DIR") {
            self.backup.backup_dir = PathBuf::from(raw);
        }
        if let Some(raw) = get("RSW_BACKUP_DISPOSAL") {
            self.backup.disposal =
                Disposal::parse(&raw).ok_or_else(|| SweepError::ConfigParse {
                    context: "env",
                    details: format!(
                        "RSW_BACKUP_DISPOSAL={raw:?}: expected \"delete\" or \"quarantine\""
                    ),
                })?;
        }
        if let Some(raw) = get("RSW_BACKUP_QUARANTINE_DIR") {
            self.backup.quarantine_dir = Some(PathBuf::from(raw));
        }
        if let Some(raw) = get("RSW_BACKUP_SPACE_MARGIN_BYTES") {
            self.backup.space_margin_bytes = parse_env("RSW_BACKUP_SPACE_MARGIN_BYTES", &raw)?;
        }

        if let Some(raw) = get("RSW_VCS_ENABLED") {
            self.vcs.enabled = parse_env("RSW_VCS_ENABLED", &raw)?;
        }
        if let Some(raw) = get("RSW_VCS_GIT_BINARY") {
            self.vcs.git_binary = raw;
        }

        if let Some(raw) = get("RSW_LOG_JSONL_PATH") {
            self.log.jsonl_path = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.scan.parallelism == 0 {
            return Err(SweepError::InvalidConfig {
                details: "scan.parallelism must be >= 1".to_string(),
            });
        }
        if self.scan.max_source_bytes == 0 {
            return Err(SweepError::InvalidConfig {
                details: "scan.max_source_bytes must be > 0".to_string(),
            });
        }
        if self.scan.source_extensions.is_empty() {
            return Err(SweepError::InvalidConfig {
                details: "scan.source_extensions must not be empty".to_string(),
            });
        }
        if self.select.include_patterns.is_empty() {
            return Err(SweepError::InvalidConfig {
                details: "select.include_patterns must not be empty".to_string(),
            });
        }
        if self.backup.disposal == Disposal::Quarantine && self.backup.quarantine_dir.is_none() {
            return Err(SweepError::InvalidConfig {
                details: "backup.quarantine_dir is required when backup.disposal = \"quarantine\""
                    .to_string(),
            });
        }
        if self.vcs.enabled && self.vcs.git_binary.trim().is_empty() {
            return Err(SweepError::InvalidConfig {
                details: "vcs.git_binary must not be empty".to_string(),
            });
        }
        for root in self.scan.template_roots.iter().chain(&self.scan.static_roots) {
            if root.is_absolute() {
                return Err(SweepError::InvalidConfig {
                    details: format!(
                        "template/static roots are root-relative, got {}",
                        root.display()
                    ),
                });
            }
        }

        PatternSet::new(&self.walk.exclude_patterns)?;
        PatternSet::new(&self.select.include_patterns)?;
        PatternSet::new(&self.select.exclude_patterns)?;
        PatternSet::new(&self.protect.patterns)?;
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| SweepError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, Disposal, ROOT_CONFIG_FILENAME, SweepError};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.scan.route_scan);
        assert!(cfg.select.include_patterns.iter().any(|p| p == "*.pyc"));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.scan.route_scan = true;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, Config::default().stable_hash().unwrap());
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.scan.parallelism = 0;
        let err = cfg.validate().expect_err("expected parallelism error");
        assert!(err.to_string().contains("parallelism"));
    }

    #[test]
    fn invalid_include_glob_is_configuration_error() {
        let mut cfg = Config::default();
        cfg.select.include_patterns.push("a/***/b".to_string());
        let err = cfg.validate().expect_err("expected glob error");
        assert_eq!(err.code(), "RSW-1004");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn quarantine_requires_directory() {
        let mut cfg = Config::default();
        cfg.backup.disposal = Disposal::Quarantine;
        let err = cfg.validate().expect_err("expected quarantine error");
        assert!(err.to_string().contains("quarantine_dir"));
        cfg.backup.quarantine_dir = Some(PathBuf::from("/tmp/q"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn absolute_template_root_rejected() {
        let mut cfg = Config::default();
        cfg.scan.template_roots = vec![PathBuf::from("/srv/templates")];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_replace_lists_and_scalars() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("RSW_SELECT_INCLUDE", "*.log, *.bak"),
            ("RSW_SCAN_PARALLELISM", "3"),
            ("RSW_SCAN_ROUTE_SCAN", "true"),
            ("RSW_BACKUP_DISPOSAL", "Quarantine"),
            ("RSW_BACKUP_QUARANTINE_DIR", "/tmp/quarantine"),
            ("RSW_SCAN_TEMPLATE_ROOTS", "app/templates,templates"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");

        assert_eq!(cfg.select.include_patterns, vec!["*.log", "*.bak"]);
        assert_eq!(cfg.scan.parallelism, 3);
        assert!(cfg.scan.route_scan);
        assert_eq!(cfg.backup.disposal, Disposal::Quarantine);
        assert_eq!(
            cfg.scan.template_roots,
            vec![PathBuf::from("app/templates"), PathBuf::from("templates")]
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_invalid_boolean_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("RSW_VCS_ENABLED", "yes-please")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid bool should fail");
        match err {
            SweepError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("RSW_VCS_ENABLED"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = Config::default();
        let overrides = vars(&[("RSW_SCAN_PARALLELISM", "   ")]);
        let before = cfg.scan.parallelism;
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .unwrap();
        assert_eq!(cfg.scan.parallelism, before);
    }

    #[test]
    fn explicit_missing_config_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&tmp.path().join("nope.toml")), tmp.path()).unwrap_err();
        assert_eq!(err.code(), "RSW-1002");
    }

    #[test]
    fn root_config_file_is_loaded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(ROOT_CONFIG_FILENAME),
            "[scan]\nroute_scan = true\nparallelism = 2\n\n[select]\ninclude_patterns = [\"*.cache\"]\n",
        )
        .unwrap();
        let cfg = Config::load(None, tmp.path()).unwrap();
        assert!(cfg.scan.route_scan);
        assert_eq!(cfg.select.include_patterns, vec!["*.cache"]);
        // Untouched sections keep defaults.
        assert!(cfg.vcs.enabled);
    }

    #[test]
    fn malformed_config_file_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[scan\nroute_scan = ").unwrap();
        let err = Config::load(Some(&path), tmp.path()).unwrap_err();
        assert_eq!(err.code(), "RSW-1003");
    }

    #[test]
    fn unreadable_config_file_is_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::create_dir(&path).unwrap();
        let err = Config::load(Some(&path), tmp.path()).unwrap_err();
        assert_eq!(err.code(), "RSW-1003");
        assert_eq!(err.exit_code(), 1);
    }
}
