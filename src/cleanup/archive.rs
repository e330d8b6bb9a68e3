//! Backup archiver: every candidate goes into one gzip-compressed tar before
//! anything is mutated.
//!
//! Write path:
//! 1. Free-space gate (candidate bytes + margin) on the backup directory.
//! 2. Each candidate is re-stat'ed against its walk snapshot; a vanished or
//!    changed file is skipped into the manifest's `skipped` list.
//! 3. Contents are streamed into `<name>.tar.gz.partial` through a SHA-256
//!    tee, then the archive is fsynced and renamed into place.
//! 4. The archive is re-read from disk and every entry's digest re-checked.
//! 5. The manifest is written (partial + fsync + rename) next to the archive.
//!
//! Only this module can produce a `VerifiedManifest`, and the executor's
//! apply path takes one by value.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cleanup::selector::{Candidate, total_bytes};
use crate::core::errors::{Result, SweepError};
use crate::core::paths::{exact, normalize_relative, resolve_absolute_path, serialize_lossy, serialize_lossy_seq};
use crate::platform::space::{FsSpaceProbe, SpaceProbe};

pub const MANIFEST_VERSION: u32 = 1;
const ARCHIVE_EXTENSION: &str = "tar.gz";
const MANIFEST_EXTENSION: &str = "manifest.json";
const PARTIAL_SUFFIX: &str = ".partial";
const RESTORE_STAGING_SUFFIX: &str = ".rsweep-restore";

// ──────────────────── manifest ────────────────────

/// One archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(with = "exact")]
    pub original_path: PathBuf,
    pub size_bytes: u64,
    /// mtime at archive time, compared again before mutation.
    pub modified: DateTime<Utc>,
    pub sha256: String,
}

/// A candidate that was not archived because it changed or vanished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    #[serde(with = "exact")]
    pub path: PathBuf,
    pub code: String,
    pub reason: String,
}

impl SkippedEntry {
    fn from_error(path: &Path, err: &SweepError) -> Self {
        Self {
            path: path.to_path_buf(),
            code: err.code().to_string(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: u32,
    #[serde(with = "exact")]
    pub archive_path: PathBuf,
    pub archive_sha256: String,
    pub created_at: DateTime<Utc>,
    /// Absolute root the entries are relative to.
    #[serde(with = "exact")]
    pub root: PathBuf,
    /// In candidate order; `entries.len() + skipped.len()` equals the
    /// number of candidates offered.
    pub entries: Vec<ManifestEntry>,
    pub skipped: Vec<SkippedEntry>,
    pub total_bytes: u64,
}

impl BackupManifest {
    pub fn entry(&self, path: &Path) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.original_path == path)
    }

    pub fn skipped_entry(&self, path: &Path) -> Option<&SkippedEntry> {
        self.skipped.iter().find(|s| s.path == path)
    }
}

/// A manifest whose archive has been re-read and checksum-verified.
#[derive(Debug, Clone)]
pub struct VerifiedManifest {
    manifest: BackupManifest,
    manifest_path: PathBuf,
    archive_path: PathBuf,
}

impl VerifiedManifest {
    pub fn manifest(&self) -> &BackupManifest {
        &self.manifest
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Where the archive was found; may differ from the recorded path when
    /// the backup directory was moved.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Load a manifest from disk and verify its archive end to end.
    pub fn verify_from_disk(manifest_path: &Path) -> Result<Self> {
        let invalid = |details: String| SweepError::ManifestInvalid {
            path: manifest_path.to_path_buf(),
            details,
        };
        let raw = fs::read_to_string(manifest_path).map_err(|e| invalid(e.to_string()))?;
        let manifest: BackupManifest =
            serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(invalid(format!(
                "unsupported manifest version {} (expected {MANIFEST_VERSION})",
                manifest.version
            )));
        }

        let archive_path = locate_archive(manifest_path, &manifest.archive_path)
            .ok_or_else(|| invalid(format!("archive {} not found", manifest.archive_path.display())))?;
        verify_archive(&archive_path, &manifest)?;
        Ok(Self {
            manifest,
            manifest_path: manifest_path.to_path_buf(),
            archive_path,
        })
    }
}

/// The recorded archive path, else a same-named sibling of the manifest.
fn locate_archive(manifest_path: &Path, recorded: &Path) -> Option<PathBuf> {
    if recorded.is_file() {
        return Some(recorded.to_path_buf());
    }
    let sibling = manifest_path.parent()?.join(recorded.file_name()?);
    sibling.is_file().then_some(sibling)
}

// ──────────────────── archiver ────────────────────

enum Appended {
    Entry(ManifestEntry),
    Skipped(SkippedEntry),
}

pub struct BackupArchiver {
    backup_dir: PathBuf,
    space_margin_bytes: u64,
    probe: Box<dyn SpaceProbe>,
}

impl BackupArchiver {
    pub fn new(backup_dir: impl Into<PathBuf>, space_margin_bytes: u64) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            space_margin_bytes,
            probe: Box::new(FsSpaceProbe),
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Box<dyn SpaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Archive `candidates` (relative to `root`) and return the verified
    /// manifest. Any error leaves no archive or manifest behind.
    pub fn archive(&self, root: &Path, candidates: &[Candidate]) -> Result<VerifiedManifest> {
        let root = resolve_absolute_path(root);
        fs::create_dir_all(&self.backup_dir)
            .map_err(|e| SweepError::archive_write(&self.backup_dir, &e))?;

        let required = total_bytes(candidates).saturating_add(self.space_margin_bytes);
        let available = self
            .probe
            .available_bytes(&self.backup_dir)
            .map_err(|e| SweepError::ArchiveWrite {
                path: self.backup_dir.clone(),
                details: format!("free-space query failed: {e}"),
            })?;
        if available < required {
            return Err(SweepError::InsufficientSpace {
                path: self.backup_dir.clone(),
                required,
                available,
            });
        }

        let created_at = Utc::now();
        let (archive_path, manifest_path) = self.allocate_names(created_at);
        let partial = with_suffix(&archive_path, PARTIAL_SUFFIX);

        let (entries, skipped) = match write_archive(&root, candidates, &partial) {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&partial);
                return Err(err);
            }
        };
        if let Err(e) = fs::rename(&partial, &archive_path) {
            let _ = fs::remove_file(&partial);
            return Err(SweepError::archive_write(&archive_path, &e));
        }
        sync_dir(&self.backup_dir);

        let finish = || -> Result<BackupManifest> {
            let archive_sha256 =
                file_sha256(&archive_path).map_err(|e| SweepError::archive_write(&archive_path, &e))?;
            let manifest = BackupManifest {
                version: MANIFEST_VERSION,
                archive_path: archive_path.clone(),
                archive_sha256,
                created_at,
                root: root.clone(),
                total_bytes: entries.iter().map(|e| e.size_bytes).sum(),
                entries,
                skipped,
            };
            verify_archive(&archive_path, &manifest)?;
            write_manifest(&manifest_path, &manifest)?;
            Ok(manifest)
        };

        match finish() {
            Ok(manifest) => {
                sync_dir(&self.backup_dir);
                Ok(VerifiedManifest {
                    manifest,
                    manifest_path,
                    archive_path,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&archive_path);
                let _ = fs::remove_file(&manifest_path);
                Err(err)
            }
        }
    }

    /// First free `rsweep-<timestamp>[-N]` name in the backup directory.
    fn allocate_names(&self, created_at: DateTime<Utc>) -> (PathBuf, PathBuf) {
        let stem = format!("rsweep-{}", created_at.format("%Y%m%dT%H%M%S%.3fZ"));
        let mut n = 0_u32;
        loop {
            let name = if n == 0 {
                stem.clone()
            } else {
                format!("{stem}-{n}")
            };
            let archive = self.backup_dir.join(format!("{name}.{ARCHIVE_EXTENSION}"));
            let manifest = self.backup_dir.join(format!("{name}.{MANIFEST_EXTENSION}"));
            let taken = archive.exists()
                || manifest.exists()
                || with_suffix(&archive, PARTIAL_SUFFIX).exists();
            if !taken {
                return (archive, manifest);
            }
            n += 1;
        }
    }
}

fn write_archive(
    root: &Path,
    candidates: &[Candidate],
    partial: &Path,
) -> Result<(Vec<ManifestEntry>, Vec<SkippedEntry>)> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(partial)
        .map_err(|e| SweepError::archive_write(partial, &e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut entries = Vec::with_capacity(candidates.len());
    let mut skipped = Vec::new();
    for candidate in candidates {
        match append_candidate(&mut builder, root, candidate, partial)? {
            Appended::Entry(entry) => entries.push(entry),
            Appended::Skipped(skip) => skipped.push(skip),
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| SweepError::archive_write(partial, &e))?;
    let writer = encoder
        .finish()
        .map_err(|e| SweepError::archive_write(partial, &e))?;
    let file = writer
        .into_inner()
        .map_err(|e| SweepError::archive_write(partial, e.error()))?;
    file.sync_all()
        .map_err(|e| SweepError::archive_write(partial, &e))?;
    Ok((entries, skipped))
}

fn append_candidate<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    candidate: &Candidate,
    archive_path: &Path,
) -> Result<Appended> {
    let absolute = root.join(&candidate.path);
    let skip = |err: SweepError| -> Result<Appended> {
        Ok(Appended::Skipped(SkippedEntry::from_error(&candidate.path, &err)))
    };
    let vanished = || SweepError::CandidateVanished {
        path: candidate.path.clone(),
    };

    let meta = match fs::symlink_metadata(&absolute) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return skip(vanished()),
        Err(e) => return skip(SweepError::io(&candidate.path, e)),
    };
    if let Some(details) = snapshot_drift(candidate.size_bytes, candidate.modified, &meta) {
        return skip(SweepError::CandidateChanged {
            path: candidate.path.clone(),
            details,
        });
    }
    let file = match File::open(&absolute) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return skip(vanished()),
        Err(e) => return skip(SweepError::io(&candidate.path, e)),
    };

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(meta.len());
    header.set_mode(file_mode(&meta));
    header.set_mtime(
        candidate
            .modified
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs()),
    );

    let mut reader = HashingReader::new(file.take(meta.len()));
    builder
        .append_data(&mut header, &candidate.path, &mut reader)
        .map_err(|e| SweepError::archive_write(archive_path, &e))?;
    let (sha256, bytes) = reader.finish();
    if bytes != meta.len() {
        // The tar stream already holds a short entry; the archive is unusable.
        return Err(SweepError::ArchiveWrite {
            path: archive_path.to_path_buf(),
            details: format!(
                "{} shrank while being archived ({bytes} of {} bytes read)",
                candidate.path.display(),
                meta.len()
            ),
        });
    }

    Ok(Appended::Entry(ManifestEntry {
        original_path: candidate.path.clone(),
        size_bytes: bytes,
        modified: DateTime::<Utc>::from(candidate.modified),
        sha256,
    }))
}

/// Describe how `meta` differs from a snapshot, if at all.
pub(crate) fn snapshot_drift(size_bytes: u64, modified: SystemTime, meta: &Metadata) -> Option<String> {
    if !meta.is_file() {
        return Some("no longer a regular file".to_string());
    }
    if meta.len() != size_bytes {
        return Some(format!("size changed from {size_bytes} to {} bytes", meta.len()));
    }
    if meta.modified().ok() != Some(modified) {
        return Some("modification time changed".to_string());
    }
    None
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &Metadata) -> u32 {
    0o644
}

fn write_manifest(path: &Path, manifest: &BackupManifest) -> Result<()> {
    let body = serde_json::to_vec_pretty(manifest).map_err(|e| SweepError::ArchiveWrite {
        path: path.to_path_buf(),
        details: format!("manifest serialization failed: {e}"),
    })?;
    let partial = with_suffix(path, PARTIAL_SUFFIX);
    let write = || -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)?;
        file.write_all(&body)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&partial, path)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&partial);
        SweepError::archive_write(path, &e)
    })
}

// ──────────────────── verification ────────────────────

/// Re-read `archive` and check it against `manifest`: whole-file digest,
/// entry order, entry count, and every entry's content digest.
fn verify_archive(archive: &Path, manifest: &BackupManifest) -> Result<()> {
    let actual = file_sha256(archive).map_err(|e| SweepError::archive_write(archive, &e))?;
    if actual != manifest.archive_sha256 {
        return Err(SweepError::ChecksumMismatch {
            path: archive.to_path_buf(),
            expected: manifest.archive_sha256.clone(),
            actual,
        });
    }

    let invalid = |details: String| SweepError::ManifestInvalid {
        path: archive.to_path_buf(),
        details,
    };
    let read_err = |e: io::Error| invalid(format!("unreadable archive: {e}"));

    let file = File::open(archive).map_err(read_err)?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut expected = manifest.entries.iter();
    for entry in tar.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        let path = entry.path().map_err(read_err)?.into_owned();
        let Some(want) = expected.next() else {
            return Err(invalid(format!("unexpected extra entry {}", path.display())));
        };
        if path != want.original_path {
            return Err(invalid(format!(
                "entry order mismatch: expected {}, found {}",
                want.original_path.display(),
                path.display()
            )));
        }
        let mut reader = HashingReader::new(&mut entry);
        io::copy(&mut reader, &mut io::sink()).map_err(read_err)?;
        let (digest, bytes) = reader.finish();
        if digest != want.sha256 || bytes != want.size_bytes {
            return Err(SweepError::ChecksumMismatch {
                path: want.original_path.clone(),
                expected: want.sha256.clone(),
                actual: digest,
            });
        }
    }
    if let Some(missing) = expected.next() {
        return Err(invalid(format!(
            "archive is missing entry {}",
            missing.original_path.display()
        )));
    }
    Ok(())
}

// ──────────────────── restore ────────────────────

/// Result of re-extracting an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    #[serde(serialize_with = "serialize_lossy")]
    pub archive_path: PathBuf,
    #[serde(serialize_with = "serialize_lossy_seq")]
    pub restored: Vec<PathBuf>,
    /// Destinations that already existed and were left alone.
    #[serde(serialize_with = "serialize_lossy_seq")]
    pub skipped_existing: Vec<PathBuf>,
}

/// Re-extract a verified archive to its original paths under `root`.
///
/// Existing files are left untouched unless `force` is set. Entries whose
/// path is absolute, escapes the root, runs through a symlinked directory, or
/// is not listed in the manifest abort the restore before anything under the
/// root is touched. Each file is unpacked to a staging sibling and renamed
/// into place only once its digest matches.
pub fn restore(manifest: &VerifiedManifest, root: &Path, force: bool) -> Result<RestoreReport> {
    let root = resolve_absolute_path(root);
    let root_canonical = root
        .canonicalize()
        .map_err(|_| SweepError::MissingRoot { path: root.clone() })?;
    let archive = manifest.archive_path();
    let invalid = |details: String| SweepError::ManifestInvalid {
        path: archive.to_path_buf(),
        details,
    };
    let read_err = |e: io::Error| invalid(format!("unreadable archive: {e}"));

    let listed: HashMap<&Path, &ManifestEntry> = manifest
        .manifest()
        .entries
        .iter()
        .map(|e| (e.original_path.as_path(), e))
        .collect();

    let mut report = RestoreReport {
        archive_path: archive.to_path_buf(),
        ..RestoreReport::default()
    };

    let file = File::open(archive).map_err(read_err)?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    for entry in tar.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        let raw = entry.path().map_err(read_err)?.into_owned();
        let relative = normalize_relative(&raw)
            .filter(|clean| *clean == raw)
            .ok_or_else(|| invalid(format!("unsafe entry path {}", raw.display())))?;
        let want = *listed
            .get(relative.as_path())
            .ok_or_else(|| invalid(format!("entry {} is not in the manifest", raw.display())))?;

        check_contained(&root, &root_canonical, &relative).map_err(&invalid)?;

        let destination = root.join(&relative);
        if let Ok(existing) = fs::symlink_metadata(&destination) {
            if !force || existing.is_dir() {
                report.skipped_existing.push(relative);
                continue;
            }
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
        }

        let staging = with_suffix(&destination, RESTORE_STAGING_SUFFIX);
        if fs::symlink_metadata(&staging).is_ok() {
            return Err(SweepError::io(
                &staging,
                io::Error::new(ErrorKind::AlreadyExists, "restore staging file already exists"),
            ));
        }
        let mut staged = || -> Result<()> {
            entry
                .unpack(&staging)
                .map_err(|e| SweepError::io(&staging, e))?;
            let digest = file_sha256(&staging).map_err(|e| SweepError::io(&staging, e))?;
            if digest != want.sha256 {
                return Err(SweepError::ChecksumMismatch {
                    path: relative.clone(),
                    expected: want.sha256.clone(),
                    actual: digest,
                });
            }
            fs::rename(&staging, &destination).map_err(|e| SweepError::io(&destination, e))
        };
        if let Err(err) = staged() {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        report.restored.push(relative);
    }
    Ok(report)
}

/// Prove that every directory between `root` and `relative` is a real
/// directory under the root: no symlinked ancestor, and the deepest existing
/// ancestor canonicalizes inside `root_canonical`.
fn check_contained(root: &Path, root_canonical: &Path, relative: &Path) -> std::result::Result<(), String> {
    let mut deepest = root.to_path_buf();
    let mut current = root.to_path_buf();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(format!(
                        "entry {} passes through symlinked directory {}",
                        relative.display(),
                        current.display()
                    ));
                }
                Ok(_) => deepest.clone_from(&current),
                Err(_) => break,
            }
        }
    }
    let canonical = deepest
        .canonicalize()
        .map_err(|e| format!("cannot resolve {}: {e}", deepest.display()))?;
    if canonical.starts_with(root_canonical) {
        Ok(())
    } else {
        Err(format!(
            "entry {} resolves outside {}",
            relative.display(),
            root.display()
        ))
    }
}

// ──────────────────── helpers ────────────────────

/// Read adapter that hashes and counts everything passing through it.
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (String, u64) {
        (format!("{:x}", self.hasher.finalize()), self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

fn file_sha256(path: &Path) -> io::Result<String> {
    let mut reader = HashingReader::new(BufReader::new(File::open(path)?));
    io::copy(&mut reader, &mut io::sink())?;
    Ok(reader.finish().0)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
