//! Shared path manipulation utilities.
//!
//! Every path that flows between pipeline stages is *root-relative* and
//! *normalized*: no `.` components, no `..` components, no leading separator.
//! Normalizing here once means set membership in the protection set is plain
//! equality.

use std::env;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    // Try filesystem resolution first (handles symlinks).
    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    // Fallback: syntactic normalization.
    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Normalize a root-relative path.
///
/// Returns `None` when the path is absolute, empty after normalization, or
/// climbs above the root with `..`. Backslashes are treated as separators so
/// references written on Windows resolve the same way. Components that are
/// not valid UTF-8 are kept byte for byte.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    if path.to_str().is_some_and(|text| text.starts_with('\\')) {
        return None;
    }
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return None,
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => match part.to_str() {
                Some(text) if text.contains('\\') => {
                    for piece in text.split('\\') {
                        match piece {
                            "" | "." => {}
                            ".." => {
                                parts.pop()?;
                            }
                            other => parts.push(OsStr::new(other)),
                        }
                    }
                }
                _ => parts.push(part),
            },
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

/// Join `base` (root-relative) with a relative reference and normalize.
pub fn join_relative(base: &Path, reference: &str) -> Option<PathBuf> {
    let trimmed = reference.trim_start_matches("./");
    if trimmed.starts_with('/') {
        return normalize_relative(Path::new(trimmed.trim_start_matches('/')));
    }
    normalize_relative(&base.join(trimmed))
}

/// Render a path with `/` separators for glob matching and reporting.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Build a path from raw bytes, as emitted by `git ls-files -z` or stored in
/// a manifest. On Unix the bytes are kept exactly.
#[cfg(unix)]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

/// Serialize a path as display text, replacing invalid UTF-8 with U+FFFD.
///
/// For reports and log payloads, which are read by people and tools but
/// never parsed back into paths.
pub fn serialize_lossy<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

pub fn serialize_lossy_opt<S: Serializer>(
    path: &Option<PathBuf>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match path {
        Some(path) => serializer.serialize_some(&path.to_string_lossy()),
        None => serializer.serialize_none(),
    }
}

pub fn serialize_lossy_seq<'a, S, I>(paths: I, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    I: IntoIterator<Item = &'a PathBuf>,
{
    serializer.collect_seq(paths.into_iter().map(|p| p.to_string_lossy()))
}

/// Exact path encoding for the backup manifest: a plain string when the path
/// is UTF-8, `{"unix_bytes": [...]}` otherwise. Restore needs the original
/// bytes back, so nothing here is lossy.
pub mod exact {
    use super::{Deserialize, Deserializer, Path, PathBuf, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Text(String),
        Bytes { unix_bytes: Vec<u8> },
    }

    impl Encoded {
        fn of(path: &Path) -> Self {
            match path.to_str() {
                Some(text) => Self::Text(text.to_string()),
                None => Self::Bytes {
                    unix_bytes: super::path_bytes(path),
                },
            }
        }

        fn into_path(self) -> PathBuf {
            match self {
                Self::Text(text) => PathBuf::from(text),
                Self::Bytes { unix_bytes } => super::path_from_bytes(&unix_bytes),
            }
        }
    }

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        Encoded::of(path).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        Encoded::deserialize(deserializer).map(Encoded::into_path)
    }
}
