//! Heuristic reference extractors, one per reference kind.
//!
//! Each extractor turns source text into `ExtractedReference`s: a raw string,
//! the line it was found on, and the root-relative paths it could denote.
//! Extractors never consult the filesystem; the scanner resolves candidates
//! against the walked file index afterwards. New dialects are added as new
//! extractors, not as branches inside existing ones.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::core::errors::{Result, SweepError};
use crate::core::paths::join_relative;
use crate::scanner::routes;

/// What kind of textual evidence produced a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    TemplateInclude,
    StaticAsset,
    ImportStatement,
    LiteralPath,
    RouteTarget,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TemplateInclude => "template-include",
            Self::StaticAsset => "static-asset",
            Self::ImportStatement => "import-statement",
            Self::LiteralPath => "literal-path",
            Self::RouteTarget => "route-target",
        })
    }
}

/// A decoded source file handed to extractors.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Root-relative path.
    pub path: PathBuf,
    pub text: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, text: String) -> Self {
        let line_starts = std::iter::once(0)
            .chain(memchr::memchr_iter(b'\n', text.as_bytes()).map(|i| i + 1))
            .collect();
        Self {
            path: path.into(),
            text,
            line_starts,
        }
    }

    /// 1-based line containing byte `offset`.
    pub fn line_at(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    /// Byte offset where 1-based `line` starts (text length past the end).
    pub fn line_offset(&self, line: usize) -> usize {
        line.checked_sub(1)
            .and_then(|idx| self.line_starts.get(idx))
            .copied()
            .unwrap_or(self.text.len())
    }

    /// Directory containing the file, root-relative.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// One extractor hit before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReference {
    pub line: usize,
    pub raw: String,
    /// Root-relative paths the raw string could denote, most likely first.
    pub candidates: Vec<PathBuf>,
    /// Keep the hit in the report even when no candidate exists.
    pub report_unresolved: bool,
}

impl ExtractedReference {
    fn new(line: usize, raw: &str, candidates: Vec<PathBuf>) -> Self {
        Self {
            line,
            raw: raw.to_string(),
            candidates: dedup(candidates),
            report_unresolved: true,
        }
    }
}

/// Strategy interface for one reference kind.
pub trait ReferenceExtractor: Send + Sync {
    fn kind(&self) -> ReferenceKind;
    fn extract(&self, source: &SourceFile) -> Vec<ExtractedReference>;
}

/// Resolution roots shared by the extractors.
#[derive(Debug, Clone, Default)]
pub struct ExtractorSettings {
    pub template_roots: Vec<PathBuf>,
    pub static_roots: Vec<PathBuf>,
}

/// The five stock extractors in a fixed order.
pub fn default_extractors(settings: &ExtractorSettings) -> Result<Vec<Box<dyn ReferenceExtractor>>> {
    Ok(vec![
        Box::new(TemplateIncludeExtractor::new(&settings.template_roots)?),
        Box::new(StaticAssetExtractor::new(&settings.static_roots)?),
        Box::new(ImportExtractor::new()?),
        Box::new(LiteralPathExtractor::new()?),
        Box::new(RouteTargetExtractor),
    ])
}

pub(crate) fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| SweepError::Runtime {
        details: format!("extractor pattern failed to compile: {e}"),
    })
}

fn dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

fn first_group<'t>(caps: &regex::Captures<'t>) -> Option<regex::Match<'t>> {
    caps.iter().skip(1).flatten().next()
}

/// Where a template name may live: each template root, the including
/// file's own template tree, and a `templates/` dir beside the source.
pub(crate) fn template_candidates(roots: &[PathBuf], source: &Path, name: &str) -> Vec<PathBuf> {
    let source_dir = source.parent().unwrap_or_else(|| Path::new(""));
    let mut out: Vec<PathBuf> = roots
        .iter()
        .filter_map(|root| join_relative(root, name))
        .collect();

    let root_names: HashSet<_> = roots.iter().filter_map(|r| r.file_name()).collect();
    for ancestor in source_dir.ancestors() {
        if ancestor.file_name().is_some_and(|n| root_names.contains(n)) {
            out.extend(join_relative(ancestor, name));
        }
    }
    out.extend(join_relative(source_dir, name));
    out.extend(join_relative(&source_dir.join("templates"), name));
    dedup(out)
}

fn static_candidates(roots: &[PathBuf], source: &Path, name: &str) -> Vec<PathBuf> {
    let source_dir = source.parent().unwrap_or_else(|| Path::new(""));
    let mut out: Vec<PathBuf> = roots
        .iter()
        .filter_map(|root| join_relative(root, name))
        .collect();
    out.extend(join_relative(&source_dir.join("static"), name));
    dedup(out)
}

/// Strip `?query` and `#fragment` suffixes from a URL-ish path.
fn strip_url_suffix(raw: &str) -> &str {
    raw.split(['?', '#']).next().unwrap_or(raw)
}

// ──────────────────── template includes ────────────────────

/// `{% include/extends/import/from "x" %}` and render calls naming a template.
pub struct TemplateIncludeExtractor {
    roots: Vec<PathBuf>,
    directive: Regex,
    render: Regex,
}

impl TemplateIncludeExtractor {
    pub fn new(roots: &[PathBuf]) -> Result<Self> {
        Ok(Self {
            roots: roots.to_vec(),
            directive: compile(
                r#"\{%-?\s*(?:include|extends|import|from|embed)\s+(?:ignore\s+missing\s+)?(?:"([^"\n]+)"|'([^'\n]+)')"#,
            )?,
            render: compile(
                r#"\b(?:render_template|render_to_response|render_to_string|get_template|select_template|TemplateResponse|render)\(\s*(?:request\s*,\s*)?(?:"([^"\n]+)"|'([^'\n]+)')"#,
            )?,
        })
    }
}

impl ReferenceExtractor for TemplateIncludeExtractor {
    fn kind(&self) -> ReferenceKind {
        ReferenceKind::TemplateInclude
    }

    fn extract(&self, source: &SourceFile) -> Vec<ExtractedReference> {
        [&self.directive, &self.render]
            .into_iter()
            .flat_map(|re| re.captures_iter(&source.text))
            .filter_map(|caps| {
                let hit = first_group(&caps)?;
                let name = hit.as_str();
                Some(ExtractedReference::new(
                    source.line_at(hit.start()),
                    name,
                    template_candidates(&self.roots, &source.path, name),
                ))
            })
            .collect()
    }
}

// ──────────────────── static assets ────────────────────

/// `url_for('static', filename=...)`, `{% static '...' %}`, and CSS `url(...)`.
pub struct StaticAssetExtractor {
    roots: Vec<PathBuf>,
    url_for: Regex,
    static_tag: Regex,
    css_url: Regex,
}

impl StaticAssetExtractor {
    pub fn new(roots: &[PathBuf]) -> Result<Self> {
        Ok(Self {
            roots: roots.to_vec(),
            url_for: compile(
                r#"url_for\(\s*["'](?:\w+\.)?static["']\s*,\s*(?:filename|path)\s*=\s*(?:"([^"\n]+)"|'([^'\n]+)')"#,
            )?,
            static_tag: compile(r#"\{%-?\s*static\s+(?:"([^"\n]+)"|'([^'\n]+)')"#)?,
            css_url: compile(r#"url\(\s*(?:"([^"\n)]+)"|'([^'\n)]+)'|([^"'\s)]+))\s*\)"#)?,
        })
    }
}

impl ReferenceExtractor for StaticAssetExtractor {
    fn kind(&self) -> ReferenceKind {
        ReferenceKind::StaticAsset
    }

    fn extract(&self, source: &SourceFile) -> Vec<ExtractedReference> {
        let mut out = Vec::new();
        for re in [&self.url_for, &self.static_tag] {
            for caps in re.captures_iter(&source.text) {
                let Some(hit) = first_group(&caps) else {
                    continue;
                };
                let name = strip_url_suffix(hit.as_str());
                out.push(ExtractedReference::new(
                    source.line_at(hit.start()),
                    name,
                    static_candidates(&self.roots, &source.path, name),
                ));
            }
        }
        for caps in self.css_url.captures_iter(&source.text) {
            let Some(hit) = first_group(&caps) else {
                continue;
            };
            let name = strip_url_suffix(hit.as_str());
            if name.is_empty() || name.starts_with("data:") || name.contains("://") {
                continue;
            }
            let mut candidates: Vec<PathBuf> = join_relative(source.dir(), name).into_iter().collect();
            candidates.extend(static_candidates(&self.roots, &source.path, name));
            out.push(ExtractedReference::new(
                source.line_at(hit.start()),
                name,
                candidates,
            ));
        }
        out
    }
}

// ──────────────────── imports ────────────────────

const PY_SUFFIXES: &[&str] = &[".py", ".pyi", "/__init__.py"];
const JS_SUFFIXES: &[&str] = &[
    "", ".js", ".mjs", ".cjs", ".jsx", ".ts", ".tsx", ".json", ".vue", "/index.js", "/index.ts",
];

/// Python `import`/`from` and JS `import`/`require` statements.
pub struct ImportExtractor {
    py_import: Regex,
    py_from: Regex,
    js_import: Regex,
}

impl ImportExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            py_import: compile(
                r"(?m)^[ \t]*import[ \t]+([\w.]+(?:[ \t]+as[ \t]+\w+)?(?:[ \t]*,[ \t]*[\w.]+(?:[ \t]+as[ \t]+\w+)?)*)[ \t]*(?:[#;].*)?$",
            )?,
            py_from: compile(r"(?m)^[ \t]*from[ \t]+(\.*[\w.]*)[ \t]+import[ \t]+(\([^)]*\)|[^\n#;]+)")?,
            js_import: compile(
                r#"(?:\bimport\s+(?:[\w*{}\s,$]+\s+from\s+)?|\bexport\s+[\w*{}\s,$]+\s+from\s+|\brequire\(\s*|\bimport\(\s*)(?:"([^"\n]+)"|'([^'\n]+)')"#,
            )?,
        })
    }

    fn python_module(source: &SourceFile, line: usize, module: &str, base: &Path) -> Option<ExtractedReference> {
        let module_path = module.replace('.', "/");
        let mut candidates = Vec::new();
        let mut bases = vec![base.to_path_buf()];
        if base != source.dir() {
            bases.push(source.dir().to_path_buf());
        }
        for dir in &bases {
            for suffix in PY_SUFFIXES {
                candidates.extend(join_relative(dir, &format!("{module_path}{suffix}")));
            }
        }
        if candidates.is_empty() {
            return None;
        }
        let mut reference = ExtractedReference::new(line, module, candidates);
        reference.report_unresolved = false;
        Some(reference)
    }

    fn python_from(&self, source: &SourceFile, out: &mut Vec<ExtractedReference>) {
        for caps in self.py_from.captures_iter(&source.text) {
            let (Some(module), Some(names)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let line = source.line_at(module.start());
            let spec = module.as_str();
            let dots = spec.chars().take_while(|c| *c == '.').count();
            let dotted = &spec[dots..];

            let base = if dots == 0 {
                PathBuf::new()
            } else {
                let mut dir = source.dir().to_path_buf();
                for _ in 1..dots {
                    if !dir.pop() {
                        break;
                    }
                }
                dir
            };

            let package = if dotted.is_empty() {
                base.clone()
            } else {
                base.join(dotted.replace('.', "/"))
            };
            if !dotted.is_empty() {
                out.extend(Self::python_module(source, line, dotted, &base));
            }

            // Imported names may themselves be submodules.
            let names = names.as_str().trim_matches(|c| c == '(' || c == ')');
            for name in names.split(',') {
                let name = name.split_whitespace().next().unwrap_or("");
                if name.is_empty() || name == "*" || !name.chars().all(|c| c == '_' || c.is_alphanumeric()) {
                    continue;
                }
                let raw = format!("{spec}.{name}").replace("..", ".");
                let mut candidates = Vec::new();
                for suffix in PY_SUFFIXES {
                    candidates.extend(join_relative(&package, &format!("{name}{suffix}")));
                }
                let mut reference = ExtractedReference::new(line, &raw, candidates);
                reference.report_unresolved = false;
                out.push(reference);
            }
        }
    }

    fn javascript(&self, source: &SourceFile, out: &mut Vec<ExtractedReference>) {
        for caps in self.js_import.captures_iter(&source.text) {
            let Some(hit) = first_group(&caps) else {
                continue;
            };
            let spec = hit.as_str();
            // Bare specifiers name packages, not files in the tree.
            if !(spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/')) {
                continue;
            }
            let candidates = JS_SUFFIXES
                .iter()
                .filter_map(|suffix| join_relative(source.dir(), &format!("{spec}{suffix}")))
                .collect();
            out.push(ExtractedReference::new(source.line_at(hit.start()), spec, candidates));
        }
    }
}

impl ReferenceExtractor for ImportExtractor {
    fn kind(&self) -> ReferenceKind {
        ReferenceKind::ImportStatement
    }

    fn extract(&self, source: &SourceFile) -> Vec<ExtractedReference> {
        let mut out = Vec::new();
        for caps in self.py_import.captures_iter(&source.text) {
            let Some(list) = caps.get(1) else {
                continue;
            };
            let line = source.line_at(list.start());
            for item in list.as_str().split(',') {
                let Some(module) = item.split_whitespace().next() else {
                    continue;
                };
                // `import a.b.c` executes a/__init__.py and a/b/__init__.py too.
                let parts: Vec<&str> = module.split('.').collect();
                for depth in 1..=parts.len() {
                    let prefix = parts[..depth].join(".");
                    out.extend(Self::python_module(source, line, &prefix, Path::new("")));
                }
            }
        }
        self.python_from(source, &mut out);
        self.javascript(source, &mut out);
        out
    }
}

// ──────────────────── literal paths ────────────────────

const LITERAL_EXTENSIONS: &[&str] = &[
    "py", "pyi", "html", "htm", "jinja", "jinja2", "j2", "js", "mjs", "cjs", "jsx", "ts", "tsx",
    "vue", "css", "scss", "less", "map", "json", "toml", "yaml", "yml", "ini", "cfg", "conf",
    "txt", "md", "rst", "csv", "xml", "svg", "png", "jpg", "jpeg", "gif", "ico", "webp", "bmp",
    "woff", "woff2", "ttf", "otf", "eot", "pdf", "db", "sqlite", "sqlite3", "sql", "sh", "pem",
    "crt", "key", "pkl", "bin", "dat", "mp3", "mp4", "wav", "zip", "gz",
];

/// Quoted strings that look like paths. Only ever adds protection.
pub struct LiteralPathExtractor {
    quoted: Regex,
    extensions: HashSet<&'static str>,
}

impl LiteralPathExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            quoted: compile(r#""([^"\n]{1,512})"|'([^'\n]{1,512})'|`([^`\n$]{1,512})`"#)?,
            extensions: LITERAL_EXTENSIONS.iter().copied().collect(),
        })
    }

    fn has_known_extension(&self, raw: &str) -> bool {
        let name = raw.rsplit('/').next().unwrap_or(raw);
        match name.rfind('.') {
            Some(idx) if idx > 0 => self
                .extensions
                .contains(name[idx + 1..].to_ascii_lowercase().as_str()),
            _ => false,
        }
    }
}

impl ReferenceExtractor for LiteralPathExtractor {
    fn kind(&self) -> ReferenceKind {
        ReferenceKind::LiteralPath
    }

    fn extract(&self, source: &SourceFile) -> Vec<ExtractedReference> {
        let mut out = Vec::new();
        for caps in self.quoted.captures_iter(&source.text) {
            let Some(hit) = first_group(&caps) else {
                continue;
            };
            let raw = strip_url_suffix(hit.as_str().trim());
            if raw.is_empty()
                || raw.contains("://")
                || raw.starts_with("mailto:")
                || raw.starts_with("data:")
                || raw.contains(['{', '}', '<', '>', '%', '*', '\\', '|'])
            {
                continue;
            }
            let known_extension = self.has_known_extension(raw);
            if !known_extension && !raw.contains('/') {
                continue;
            }
            if raw.chars().all(|c| c == '/' || c == '.') {
                continue;
            }

            let mut candidates: Vec<PathBuf> = Vec::new();
            if !raw.starts_with('/') {
                candidates.extend(join_relative(source.dir(), raw));
            }
            candidates.extend(join_relative(Path::new(""), raw));

            let mut reference = ExtractedReference::new(source.line_at(hit.start()), raw, candidates);
            reference.report_unresolved = known_extension;
            out.push(reference);
        }
        out
    }
}

// ──────────────────── route targets ────────────────────

/// Route declarations. Each declaration references the file that declares
/// it (the handler module is an entry point); the declarations themselves
/// feed the route table.
pub struct RouteTargetExtractor;

impl ReferenceExtractor for RouteTargetExtractor {
    fn kind(&self) -> ReferenceKind {
        ReferenceKind::RouteTarget
    }

    fn extract(&self, source: &SourceFile) -> Vec<ExtractedReference> {
        routes::declarations(source)
            .into_iter()
            .map(|route| {
                ExtractedReference::new(route.lines.0, &route.rule, vec![source.path.clone()])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ExtractorSettings {
        ExtractorSettings {
            template_roots: vec![PathBuf::from("templates")],
            static_roots: vec![PathBuf::from("static")],
        }
    }

    fn run(extractor: &dyn ReferenceExtractor, path: &str, text: &str) -> Vec<ExtractedReference> {
        extractor.extract(&SourceFile::new(path, text.to_string()))
    }

    fn raws(refs: &[ExtractedReference]) -> Vec<&str> {
        refs.iter().map(|r| r.raw.as_str()).collect()
    }

    #[test]
    fn line_numbers_are_one_based() {
        let src = SourceFile::new("a.py", "one\ntwo\nthree".to_string());
        assert_eq!(src.line_at(0), 1);
        assert_eq!(src.line_at(4), 2);
        assert_eq!(src.line_at(10), 3);
        assert_eq!(src.line_offset(2), 4);
        assert_eq!(src.line_offset(99), src.text.len());
    }

    #[test]
    fn template_directives_and_render_calls() {
        let ex = TemplateIncludeExtractor::new(&settings().template_roots).unwrap();
        let refs = run(
            &ex,
            "templates/page.html",
            "{% extends \"base.html\" %}\n{%- include 'partials/nav.html' %}\n",
        );
        assert_eq!(raws(&refs), vec!["base.html", "partials/nav.html"]);
        assert_eq!(refs[0].line, 1);
        assert_eq!(refs[1].line, 2);
        assert_eq!(refs[0].candidates[0], PathBuf::from("templates/base.html"));

        let refs = run(&ex, "app.py", "return render_template(\"page.html\", x=1)\n");
        assert_eq!(raws(&refs), vec!["page.html"]);
        assert!(refs[0].candidates.contains(&PathBuf::from("templates/page.html")));
    }

    #[test]
    fn blueprint_template_dirs_are_candidates() {
        let ex = TemplateIncludeExtractor::new(&settings().template_roots).unwrap();
        let refs = run(&ex, "shop/views.py", "render_template('cart.html')");
        assert!(refs[0].candidates.contains(&PathBuf::from("shop/templates/cart.html")));

        let refs = run(&ex, "shop/templates/cart.html", "{% include 'row.html' %}");
        assert!(refs[0].candidates.contains(&PathBuf::from("shop/templates/row.html")));
    }

    #[test]
    fn static_urls_resolve_under_static_root() {
        let ex = StaticAssetExtractor::new(&settings().static_roots).unwrap();
        let refs = run(
            &ex,
            "templates/base.html",
            "<link href=\"{{ url_for('static', filename='css/site.css') }}\">\n{% static \"js/app.js?v=3\" %}",
        );
        assert_eq!(raws(&refs), vec!["css/site.css", "js/app.js"]);
        assert_eq!(refs[0].candidates[0], PathBuf::from("static/css/site.css"));
    }

    #[test]
    fn css_urls_resolve_relative_to_stylesheet() {
        let ex = StaticAssetExtractor::new(&settings().static_roots).unwrap();
        let refs = run(
            &ex,
            "static/css/site.css",
            "body { background: url(../img/bg.png); }\n.x { background: url(\"data:image/png;base64,AA\") }",
        );
        assert_eq!(raws(&refs), vec!["../img/bg.png"]);
        assert_eq!(refs[0].candidates[0], PathBuf::from("static/img/bg.png"));
    }

    #[test]
    fn python_imports_append_extensions() {
        let ex = ImportExtractor::new().unwrap();
        let refs = run(&ex, "app.py", "import helpers\nimport pkg.mod as m, os\n");
        let helpers = refs.iter().find(|r| r.raw == "helpers").unwrap();
        assert_eq!(helpers.line, 1);
        assert!(helpers.candidates.contains(&PathBuf::from("helpers.py")));
        assert!(helpers.candidates.contains(&PathBuf::from("helpers/__init__.py")));
        assert!(!helpers.report_unresolved);

        let pkg = refs.iter().find(|r| r.raw == "pkg").unwrap();
        assert!(pkg.candidates.contains(&PathBuf::from("pkg/__init__.py")));
        let module = refs.iter().find(|r| r.raw == "pkg.mod").unwrap();
        assert!(module.candidates.contains(&PathBuf::from("pkg/mod.py")));
    }

    #[test]
    fn python_relative_from_imports() {
        let ex = ImportExtractor::new().unwrap();
        let refs = run(
            &ex,
            "shop/views.py",
            "from . import models\nfrom ..core.db import (\n    session,\n)\n",
        );
        let models = refs.iter().find(|r| r.raw == ".models").unwrap();
        assert!(models.candidates.contains(&PathBuf::from("shop/models.py")));

        let db = refs.iter().find(|r| r.raw == "core.db").unwrap();
        assert!(db.candidates.contains(&PathBuf::from("core/db.py")));
        let session = refs.iter().find(|r| r.raw.ends_with("session")).unwrap();
        assert!(session.candidates.contains(&PathBuf::from("core/db/session.py")));
    }

    #[test]
    fn javascript_relative_imports_only() {
        let ex = ImportExtractor::new().unwrap();
        let refs = run(
            &ex,
            "static/js/app.js",
            "import React from 'react';\nimport { a } from \"./util\";\nconst x = require('../lib/x.js');\n",
        );
        assert_eq!(raws(&refs), vec!["./util", "../lib/x.js"]);
        assert!(refs[0].candidates.contains(&PathBuf::from("static/js/util.js")));
        assert!(refs[1].candidates.contains(&PathBuf::from("static/lib/x.js")));
    }

    #[test]
    fn literal_paths_need_separator_or_extension() {
        let ex = LiteralPathExtractor::new().unwrap();
        let refs = run(
            &ex,
            "cfg/settings.py",
            r#"A = "data/seed.csv"
B = "confirm"
C = "https://example.com/x.js"
D = 'notes.txt'
E = ".html"
F = "{name}.html"
"#,
        );
        assert_eq!(raws(&refs), vec!["data/seed.csv", "notes.txt"]);
        assert_eq!(
            refs[0].candidates,
            vec![PathBuf::from("cfg/data/seed.csv"), PathBuf::from("data/seed.csv")]
        );
        assert!(refs[1].report_unresolved);
    }

    #[test]
    fn leading_slash_literal_is_root_relative() {
        let ex = LiteralPathExtractor::new().unwrap();
        let refs = run(&ex, "templates/base.html", r#"<script src="/static/app.js"></script>"#);
        assert_eq!(refs[0].candidates, vec![PathBuf::from("static/app.js")]);
    }

    #[test]
    fn route_declarations_reference_their_module() {
        let refs = run(
            &RouteTargetExtractor,
            "views/forms.py",
            "@app.route('/submit', methods=['POST'])\ndef submit():\n    pass\n",
        );
        assert_eq!(raws(&refs), vec!["/submit"]);
        assert_eq!(refs[0].candidates, vec![PathBuf::from("views/forms.py")]);
    }

    #[test]
    fn default_set_covers_every_kind() {
        let kinds: Vec<ReferenceKind> = default_extractors(&settings())
            .unwrap()
            .iter()
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                ReferenceKind::TemplateInclude,
                ReferenceKind::StaticAsset,
                ReferenceKind::ImportStatement,
                ReferenceKind::LiteralPath,
                ReferenceKind::RouteTarget,
            ]
        );
    }
}
