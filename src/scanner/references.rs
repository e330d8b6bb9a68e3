//! Reference scanner: classify source-like files, run every extractor over
//! them on a bounded worker pool, then resolve hits against the walked file
//! index.
//!
//! Workers only append to a shared collector; no extractor sees another's
//! output. Results are re-sorted afterwards, so scheduling order never leaks
//! into the output. Resolution fails closed: every existing candidate of a
//! hit is protected, and a hit with no existing candidate is kept as
//! unresolved for the report without protecting anything.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crossbeam_channel as channel;
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::ScanConfig;
use crate::core::errors::Result;
use crate::core::paths::{serialize_lossy, serialize_lossy_seq};
use crate::scanner::extractors::{
    ExtractedReference, ExtractorSettings, ReferenceExtractor, ReferenceKind, SourceFile,
    default_extractors,
};
use crate::scanner::routes::{Route, RouteSimulator, declarations};
use crate::scanner::walker::FileNode;

/// Bytes inspected for NUL bytes and shebang lines.
const SNIFF_BYTES: usize = 8 * 1024;

/// A recoverable scan problem. Never reduces protection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ScanWarning {
    #[serde(serialize_with = "serialize_lossy")]
    pub path: PathBuf,
    pub reason: String,
}

/// One piece of evidence that `source_path` depends on other files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceRecord {
    #[serde(serialize_with = "serialize_lossy")]
    pub source_path: PathBuf,
    pub line: usize,
    pub kind: ReferenceKind,
    /// The string as written in the source.
    pub raw: String,
    /// Walked paths the reference resolved to; empty when unresolved.
    #[serde(serialize_with = "serialize_lossy_seq")]
    pub resolved: Vec<PathBuf>,
}

impl ReferenceRecord {
    pub fn is_resolved(&self) -> bool {
        !self.resolved.is_empty()
    }

    fn sort_key(&self) -> (&Path, usize, ReferenceKind, &str) {
        (&self.source_path, self.line, self.kind, &self.raw)
    }
}

/// Scanner output for one run.
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub records: Vec<ReferenceRecord>,
    pub routes: Vec<Route>,
    pub warnings: Vec<ScanWarning>,
    pub sources_scanned: usize,
}

impl ScanOutput {
    /// Every path some reference resolved to.
    pub fn referenced_paths(&self) -> BTreeSet<PathBuf> {
        self.records
            .iter()
            .flat_map(|r| r.resolved.iter().cloned())
            .collect()
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &ReferenceRecord> {
        self.records.iter().filter(|r| !r.is_resolved())
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub source_extensions: HashSet<String>,
    pub max_source_bytes: u64,
    pub parallelism: usize,
    pub route_scan: bool,
    pub extractors: ExtractorSettings,
}

impl From<&ScanConfig> for ScanSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            source_extensions: config
                .source_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_source_bytes: config.max_source_bytes,
            parallelism: config.parallelism.max(1),
            route_scan: config.route_scan,
            extractors: ExtractorSettings {
                template_roots: config.template_roots.clone(),
                static_roots: config.static_roots.clone(),
            },
        }
    }
}

struct Hit {
    source: PathBuf,
    kind: ReferenceKind,
    reference: ExtractedReference,
}

#[derive(Default)]
struct Collector {
    hits: Vec<Hit>,
    routes: Vec<Route>,
    route_sources: Vec<SourceFile>,
    warnings: Vec<ScanWarning>,
    scanned: usize,
}

enum Classification {
    Source,
    Sniff,
    Ignore,
}

pub struct ReferenceScanner {
    settings: ScanSettings,
    extractors: Vec<Box<dyn ReferenceExtractor>>,
    simulator: Option<RouteSimulator>,
}

impl ReferenceScanner {
    /// Scanner with the five stock extractors.
    pub fn new(settings: ScanSettings) -> Result<Self> {
        let extractors = default_extractors(&settings.extractors)?;
        Self::with_extractors(settings, extractors)
    }

    /// Scanner with a caller-chosen extractor set.
    pub fn with_extractors(
        settings: ScanSettings,
        extractors: Vec<Box<dyn ReferenceExtractor>>,
    ) -> Result<Self> {
        let simulator = if settings.route_scan {
            Some(RouteSimulator::new(&settings.extractors.template_roots)?)
        } else {
            None
        };
        Ok(Self {
            settings,
            extractors,
            simulator,
        })
    }

    /// Scan every source-like file among `nodes` (walked under `root`).
    pub fn scan(&self, root: &Path, nodes: &[FileNode]) -> ScanOutput {
        let collector = Mutex::new(Collector::default());
        let parallelism = self.settings.parallelism.max(1);
        let (work_tx, work_rx) = channel::bounded::<&FileNode>(parallelism * 4);

        std::thread::scope(|scope| {
            for _ in 0..parallelism {
                let work_rx = work_rx.clone();
                let collector = &collector;
                scope.spawn(move || {
                    for node in work_rx {
                        self.scan_file(root, node, collector);
                    }
                });
            }
            drop(work_rx);
            for node in nodes.iter().filter(|n| !n.is_dir) {
                if work_tx.send(node).is_err() {
                    break;
                }
            }
            drop(work_tx);
        });

        let collected = collector.into_inner();
        self.finish(nodes, collected)
    }

    fn classify(&self, path: &Path) -> Classification {
        match path.extension() {
            Some(ext) => {
                if self
                    .settings
                    .source_extensions
                    .contains(&ext.to_string_lossy().to_ascii_lowercase())
                {
                    Classification::Source
                } else {
                    Classification::Ignore
                }
            }
            None => Classification::Sniff,
        }
    }

    fn scan_file(&self, root: &Path, node: &FileNode, collector: &Mutex<Collector>) {
        let classification = self.classify(&node.path);
        if matches!(classification, Classification::Ignore) {
            return;
        }
        let warn = |reason: String| {
            collector.lock().warnings.push(ScanWarning {
                path: node.path.clone(),
                reason,
            });
        };

        let absolute = root.join(&node.path);
        if matches!(classification, Classification::Sniff) {
            match sniff_script(&absolute) {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    warn(format!("unreadable: {err}"));
                    return;
                }
            }
        }

        if node.size_bytes > self.settings.max_source_bytes {
            warn(format!(
                "skipped: {} bytes exceeds max_source_bytes {}",
                node.size_bytes, self.settings.max_source_bytes
            ));
            return;
        }

        let bytes = match fs::read(&absolute) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn(format!("unreadable: {err}"));
                return;
            }
        };
        if memchr::memchr(0, &bytes[..bytes.len().min(SNIFF_BYTES)]).is_some() {
            warn("skipped: binary content".to_string());
            return;
        }
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                warn(format!("unparseable: not valid UTF-8 ({err})"));
                return;
            }
        };

        let source = SourceFile::new(node.path.clone(), text);
        let source_path = &source.path;
        let hits: Vec<Hit> = self
            .extractors
            .iter()
            .flat_map(|extractor| {
                let kind = extractor.kind();
                extractor.extract(&source).into_iter().map(move |reference| Hit {
                    source: source_path.clone(),
                    kind,
                    reference,
                })
            })
            .collect();
        let routes = declarations(&source);

        let mut guard = collector.lock();
        guard.scanned += 1;
        guard.hits.extend(hits);
        if !routes.is_empty() {
            guard.routes.extend(routes);
            if self.simulator.is_some() {
                guard.route_sources.push(source);
            }
        }
    }

    fn finish(&self, nodes: &[FileNode], mut collected: Collector) -> ScanOutput {
        let index: HashSet<&Path> = nodes.iter().map(|n| n.path.as_path()).collect();

        collected
            .routes
            .sort_by(|a, b| (&a.source_path, a.lines).cmp(&(&b.source_path, b.lines)));

        if let Some(simulator) = &self.simulator {
            let sources: BTreeMap<&Path, &SourceFile> = collected
                .route_sources
                .iter()
                .map(|s| (s.path.as_path(), s))
                .collect();
            for route in &collected.routes {
                let Some(source) = sources.get(route.source_path.as_path()) else {
                    continue;
                };
                collected.hits.extend(simulator.simulate(route, source).into_iter().map(
                    |reference| Hit {
                        source: route.source_path.clone(),
                        kind: ReferenceKind::RouteTarget,
                        reference,
                    },
                ));
            }
        }

        let mut records: Vec<ReferenceRecord> = collected
            .hits
            .into_iter()
            .filter_map(|hit| {
                let resolved: Vec<PathBuf> = hit
                    .reference
                    .candidates
                    .into_iter()
                    .filter(|c| index.contains(c.as_path()))
                    .collect();
                if resolved.is_empty() && !hit.reference.report_unresolved {
                    return None;
                }
                Some(ReferenceRecord {
                    source_path: hit.source,
                    line: hit.reference.line,
                    kind: hit.kind,
                    raw: hit.reference.raw,
                    resolved,
                })
            })
            .collect();

        // An unresolved hit is noise when another extractor resolved the
        // same string on the same line.
        let resolved_keys: HashSet<(PathBuf, usize, String)> = records
            .iter()
            .filter(|r| r.is_resolved())
            .map(|r| (r.source_path.clone(), r.line, r.raw.clone()))
            .collect();
        records.retain(|r| {
            r.is_resolved() || !resolved_keys.contains(&(r.source_path.clone(), r.line, r.raw.clone()))
        });

        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.resolved.cmp(&b.resolved)));
        records.dedup();

        collected.warnings.sort();
        ScanOutput {
            records,
            routes: collected.routes,
            warnings: collected.warnings,
            sources_scanned: collected.scanned,
        }
    }
}

/// Extension-less files count as source when they start with a shebang.
fn sniff_script(path: &Path) -> std::io::Result<bool> {
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    fs::File::open(path)?
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut head)?;
    Ok(head.starts_with(b"#!") && memchr::memchr(0, &head).is_none())
}
