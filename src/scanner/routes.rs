//! Route table and route simulator.
//!
//! Routes are first-class: an endpoint, a URL rule, a method set and the
//! handler's source slice (declaration line up to the next declaration that
//! follows the handler body, or EOF). The simulator replays each slice
//! textually, evaluating the string-building expressions a handler uses to
//! name the files it renders or opens. It only ever adds references.

#![allow(missing_docs)]

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::errors::Result;
use crate::core::paths::{join_relative, serialize_lossy};
use crate::scanner::extractors::{ExtractedReference, SourceFile, compile, template_candidates};

/// Extensions tried for a bare template name in a rendering handler.
pub const TEMPLATE_EXTENSIONS: &[&str] = &["html", "htm", "jinja", "jinja2", "j2", "txt"];

/// Cap on the number of values one expression may evaluate to.
const MAX_VALUES: usize = 64;

/// One declared route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub endpoint: String,
    pub rule: String,
    pub methods: BTreeSet<String>,
    #[serde(serialize_with = "serialize_lossy")]
    pub source_path: PathBuf,
    /// Inclusive 1-based line range of the handler slice.
    pub lines: (usize, usize),
}

impl Route {
    /// True when no safe method (GET/HEAD) reaches this route.
    pub fn state_changing_only(&self) -> bool {
        !self.methods.is_empty()
            && !self
                .methods
                .iter()
                .any(|m| m == "GET" || m == "HEAD" || m == "ALL")
    }
}

struct DeclarationPatterns {
    decorator_route: Regex,
    decorator_method: Regex,
    url_rule: Regex,
    router_call: Regex,
    methods: Regex,
    def_name: Regex,
    view_func: Regex,
}

// Patterns are fixed strings; failure to compile is caught by the unit tests.
static DECLARATIONS: LazyLock<Option<DeclarationPatterns>> = LazyLock::new(|| {
    Some(DeclarationPatterns {
        decorator_route: compile(r#"(?m)^[ \t]*@[\w.]+\.route\(\s*["']([^"'\n]+)["']([^\n]*)"#).ok()?,
        decorator_method: compile(
            r#"(?m)^[ \t]*@[\w.]+\.(get|post|put|patch|delete|head|options)\(\s*["']([^"'\n]+)["']"#,
        )
        .ok()?,
        url_rule: compile(
            r#"add_url_rule\(\s*["']([^"'\n]+)["']\s*(?:,\s*(?:endpoint\s*=\s*)?["']([^"'\n]+)["'])?([^\n]*)"#,
        )
        .ok()?,
        router_call: compile(
            r#"(?m)^[ \t]*(?:app|router|server|api)\.(get|post|put|patch|delete|all)\(\s*["'`]([^"'`\n]+)["'`]"#,
        )
        .ok()?,
        methods: compile(r#"methods\s*=\s*[\[(]([^\])]*)[\])]"#).ok()?,
        def_name: compile(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+(\w+)").ok()?,
        view_func: compile(r"view_func\s*=\s*([\w.]+)").ok()?,
    })
});

struct Declaration {
    line: usize,
    body_line: usize,
    endpoint: String,
    rule: String,
    methods: BTreeSet<String>,
}

fn parse_methods(patterns: &DeclarationPatterns, rest: &str) -> BTreeSet<String> {
    patterns
        .methods
        .captures(rest)
        .and_then(|caps| caps.get(1))
        .map(|list| {
            list.as_str()
                .split(',')
                .map(|m| m.trim().trim_matches(['"', '\'']).to_ascii_uppercase())
                .filter(|m| !m.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Parse every route declaration in `source`, in line order.
pub fn declarations(source: &SourceFile) -> Vec<Route> {
    let Some(patterns) = DECLARATIONS.as_ref() else {
        return Vec::new();
    };
    let text = &source.text;

    let next_def = |offset: usize| -> (usize, String) {
        patterns
            .def_name
            .captures_at(text, offset)
            .and_then(|caps| caps.get(1))
            .map_or((source.line_at(offset), String::new()), |name| {
                (source.line_at(name.start()), name.as_str().to_string())
            })
    };

    let mut found: Vec<Declaration> = Vec::new();

    for caps in patterns.decorator_route.captures_iter(text) {
        let (Some(whole), Some(rule)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let rest = caps.get(2).map_or("", |m| m.as_str());
        let mut methods = parse_methods(patterns, rest);
        if methods.is_empty() {
            methods.insert("GET".to_string());
        }
        let (body_line, endpoint) = next_def(whole.end());
        found.push(Declaration {
            line: source.line_at(rule.start()),
            body_line,
            endpoint,
            rule: rule.as_str().to_string(),
            methods,
        });
    }

    for caps in patterns.decorator_method.captures_iter(text) {
        let (Some(whole), Some(method), Some(rule)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let (body_line, endpoint) = next_def(whole.end());
        found.push(Declaration {
            line: source.line_at(rule.start()),
            body_line,
            endpoint,
            rule: rule.as_str().to_string(),
            methods: BTreeSet::from([method.as_str().to_ascii_uppercase()]),
        });
    }

    for caps in patterns.url_rule.captures_iter(text) {
        let Some(rule) = caps.get(1) else {
            continue;
        };
        let rest = caps.get(3).map_or("", |m| m.as_str());
        let endpoint = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .or_else(|| {
                patterns
                    .view_func
                    .captures(rest)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .unwrap_or_default();
        let mut methods = parse_methods(patterns, rest);
        if methods.is_empty() {
            methods.insert("GET".to_string());
        }
        let line = source.line_at(rule.start());
        found.push(Declaration {
            line,
            body_line: line,
            endpoint,
            rule: rule.as_str().to_string(),
            methods,
        });
    }

    for caps in patterns.router_call.captures_iter(text) {
        let (Some(method), Some(rule)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let method = method.as_str().to_ascii_uppercase();
        let line = source.line_at(rule.start());
        found.push(Declaration {
            line,
            body_line: line,
            endpoint: format!("{method} {}", rule.as_str()),
            rule: rule.as_str().to_string(),
            methods: BTreeSet::from([method]),
        });
    }

    found.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.rule.cmp(&b.rule)));
    found.dedup_by(|b, a| a.line == b.line && a.rule == b.rule);

    let last_line = source.line_at(text.len().saturating_sub(1)).max(1);
    let starts: Vec<usize> = found.iter().map(|d| d.line).collect();
    found
        .into_iter()
        .map(|decl| {
            let end = starts
                .iter()
                .find(|&&start| start > decl.body_line)
                .map_or(last_line, |start| start - 1);
            Route {
                endpoint: decl.endpoint,
                rule: decl.rule,
                methods: decl.methods,
                source_path: source.path.clone(),
                lines: (decl.line, end.max(decl.line)),
            }
        })
        .collect()
}

/// Best-effort static replay of route handler slices.
pub struct RouteSimulator {
    template_roots: Vec<PathBuf>,
    assignment: Regex,
    render_call: Regex,
    file_call: Regex,
    string_literal: Regex,
}

impl RouteSimulator {
    pub fn new(template_roots: &[PathBuf]) -> Result<Self> {
        Ok(Self {
            template_roots: template_roots.to_vec(),
            assignment: compile(
                r"(?m)^([ \t]*)(?:(?:const|let|var)[ \t]+)?([A-Za-z_$][\w$]*)[ \t]*(?::[^=\n]+)?(\+?=)[ \t]*([^=\n][^\n]*)$",
            )?,
            render_call: compile(
                r"\b(?:render_template|render_to_response|render_to_string|get_template|select_template|TemplateResponse|render)\(\s*(?:request\s*,\s*)?",
            )?,
            file_call: compile(r"\b(send_file|send_from_directory|sendFile|FileResponse|open)\(\s*")?,
            string_literal: compile(r#""([^"\n]*)"|'([^'\n]*)'"#)?,
        })
    }

    /// Replay one route's slice and return every file it plausibly touches.
    pub fn simulate(&self, route: &Route, source: &SourceFile) -> Vec<ExtractedReference> {
        let start = source.line_offset(route.lines.0);
        let end = source.line_offset(route.lines.1 + 1);
        let slice = &source.text[start..end.max(start)];

        let mut bindings = self.module_bindings(&source.text);
        self.collect_bindings(slice, &mut bindings, false);

        let mut out = Vec::new();
        let mut renders = false;

        for hit in self.render_call.find_iter(slice) {
            renders = true;
            let line = source.line_at(start + hit.start());
            for name in eval_args(&slice[hit.end()..], &bindings)
                .into_iter()
                .next()
                .unwrap_or_default()
            {
                out.push(reference(
                    line,
                    &name,
                    template_candidates(&self.template_roots, &source.path, &name),
                    true,
                ));
            }
        }

        for caps in self.file_call.captures_iter(slice) {
            let (Some(func), Some(whole)) = (caps.get(1), caps.get(0)) else {
                continue;
            };
            let line = source.line_at(start + whole.start());
            let args = eval_args(&slice[whole.end()..], &bindings);
            let paths: Vec<String> = if func.as_str() == "send_from_directory" {
                match (args.first(), args.get(1)) {
                    (Some(dirs), Some(names)) => dirs
                        .iter()
                        .flat_map(|d| names.iter().map(move |n| format!("{d}/{n}")))
                        .take(MAX_VALUES)
                        .collect(),
                    _ => Vec::new(),
                }
            } else {
                args.into_iter().next().unwrap_or_default()
            };
            for path in paths {
                let mut candidates: Vec<PathBuf> = join_relative(source.dir(), &path).into_iter().collect();
                candidates.extend(join_relative(Path::new(""), &path));
                out.push(reference(line, &path, candidates, true));
            }
        }

        if renders {
            for caps in self.string_literal.captures_iter(slice) {
                let Some(hit) = caps.get(1).or_else(|| caps.get(2)) else {
                    continue;
                };
                let name = hit.as_str();
                if name.is_empty()
                    || name.contains('.')
                    || !name.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '/'))
                    || name.starts_with('/')
                {
                    continue;
                }
                let line = source.line_at(start + hit.start());
                for ext in TEMPLATE_EXTENSIONS {
                    let guess = format!("{name}.{ext}");
                    out.push(reference(
                        line,
                        &guess,
                        template_candidates(&self.template_roots, &source.path, &guess),
                        false,
                    ));
                }
            }
        }

        out
    }

    /// Unindented assignments anywhere in the file (module constants).
    fn module_bindings(&self, text: &str) -> HashMap<String, Vec<String>> {
        let mut bindings = HashMap::new();
        self.collect_bindings(text, &mut bindings, true);
        bindings
    }

    fn collect_bindings(&self, text: &str, bindings: &mut HashMap<String, Vec<String>>, top_level_only: bool) {
        for caps in self.assignment.captures_iter(text) {
            let (Some(indent), Some(name), Some(op), Some(expr)) =
                (caps.get(1), caps.get(2), caps.get(3), caps.get(4))
            else {
                continue;
            };
            if top_level_only && !indent.as_str().is_empty() {
                continue;
            }
            let Some(values) = eval_args(expr.as_str(), bindings).into_iter().next() else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            let entry = bindings.entry(name.as_str().to_string()).or_default();
            if op.as_str() == "+=" {
                let extended: Vec<String> = entry
                    .iter()
                    .flat_map(|base| values.iter().map(move |v| format!("{base}{v}")))
                    .take(MAX_VALUES)
                    .collect();
                entry.extend(extended);
            } else {
                entry.extend(values);
            }
            entry.sort();
            entry.dedup();
            entry.truncate(MAX_VALUES);
        }
    }
}

fn reference(line: usize, raw: &str, candidates: Vec<PathBuf>, report_unresolved: bool) -> ExtractedReference {
    ExtractedReference {
        line,
        raw: raw.to_string(),
        candidates,
        report_unresolved,
    }
}

/// Evaluate a comma-separated argument list up to its closing paren.
/// Each argument yields its possible string values, empty when unknown.
fn eval_args(text: &str, bindings: &HashMap<String, Vec<String>>) -> Vec<Vec<String>> {
    split_args(text)
        .into_iter()
        .map(|arg| eval_expr(arg, bindings).unwrap_or_default())
        .collect()
}

/// Split top-level arguments; stops at the closing paren, a statement
/// terminator, a comment, or end of line.
fn split_args(text: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut arg_start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth > 0 => depth -= 1,
            ',' if depth == 0 => {
                args.push(text[arg_start..i].trim());
                arg_start = i + 1;
            }
            ')' | ';' | '#' | '\n' if depth == 0 => {
                args.push(text[arg_start..i].trim());
                return args;
            }
            '/' if depth == 0 && chars.peek().is_some_and(|(_, next)| *next == '/') => {
                args.push(text[arg_start..i].trim());
                return args;
            }
            _ => {}
        }
    }
    args.push(text[arg_start..].trim());
    args
}

/// Split on top-level `+`.
fn split_concat(expr: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut term_start = 0;
    let mut escaped = false;
    for (i, c) in expr.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '+' if depth == 0 => {
                terms.push(expr[term_start..i].trim());
                term_start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(expr[term_start..].trim());
    terms
}

fn eval_expr(expr: &str, bindings: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut values = vec![String::new()];
    for term in split_concat(expr) {
        let term_values = eval_term(term, bindings)?;
        values = values
            .iter()
            .flat_map(|prefix| term_values.iter().map(move |v| format!("{prefix}{v}")))
            .take(MAX_VALUES)
            .collect();
    }
    Some(values)
}

fn eval_term(term: &str, bindings: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    if let Some(inner) = term.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return eval_expr(inner, bindings);
    }
    if let Some(literal) = quoted(term, &['"', '\'']) {
        return Some(vec![literal.to_string()]);
    }
    let lower = term.to_ascii_lowercase();
    for prefix in ["f", "rf", "fr"] {
        if let Some(body) = lower
            .strip_prefix(prefix)
            .and_then(|_| quoted(&term[prefix.len()..], &['"', '\'']))
        {
            return interpolate(body, "{", bindings);
        }
    }
    if let Some(body) = quoted(term, &['`']) {
        return interpolate(body, "${", bindings);
    }
    if term.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
        return bindings.get(term).cloned();
    }
    None
}

fn quoted<'a>(term: &'a str, quotes: &[char]) -> Option<&'a str> {
    let first = term.chars().next()?;
    if !quotes.contains(&first) || term.len() < 2 || !term.ends_with(first) {
        return None;
    }
    Some(&term[1..term.len() - 1])
}

/// Substitute `{name}` (or `${name}`) placeholders with every bound value.
fn interpolate(body: &str, open: &str, bindings: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut values = vec![String::new()];
    let mut rest = body;
    while let Some(idx) = rest.find(open) {
        let literal = &rest[..idx];
        let after = &rest[idx + open.len()..];
        let close = after.find('}')?;
        let name = after[..close]
            .split(['!', ':'])
            .next()
            .unwrap_or("")
            .trim();
        let bound = bindings.get(name)?;
        values = values
            .iter()
            .flat_map(|prefix| bound.iter().map(move |v| format!("{prefix}{literal}{v}")))
            .take(MAX_VALUES)
            .collect();
        rest = &after[close + 1..];
    }
    Some(values.into_iter().map(|v| format!("{v}{rest}")).collect())
}
