//! Shell-style glob patterns compiled to anchored regexes.
//!
//! Patterns are matched against root-relative paths with `/` separators:
//! - `**` matches any path (including separators); `**/` may match nothing
//! - `*`  matches anything except `/`
//! - `?`  matches a single character except `/`
//!
//! A pattern with no `/` is also tried against the final path component, so
//! `*.pyc` selects bytecode at any depth the way ignore files do.

#![allow(missing_docs)]

use std::path::Path;

use regex::Regex;

use crate::core::errors::{Result, SweepError};
use crate::core::paths::to_slash;

/// One compiled glob.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    original: String,
    compiled: Regex,
    basename_only: bool,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        validate_glob_pattern(pattern)?;
        let compiled = glob_to_regex(pattern)?;
        Ok(Self {
            original: pattern.to_string(),
            compiled,
            basename_only: !pattern.contains('/') && !pattern.contains('\\'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Match the path itself.
    pub fn is_match(&self, path: &Path) -> bool {
        if self.compiled.is_match(&to_slash(path)) {
            return true;
        }
        self.basename_only
            && path
                .file_name()
                .is_some_and(|name| self.compiled.is_match(&name.to_string_lossy()))
    }

    /// Match the path or any of its ancestors, so a pattern naming a
    /// directory covers its whole subtree.
    pub fn matches_self_or_ancestor(&self, path: &Path) -> bool {
        let mut current = Some(path);
        while let Some(p) = current {
            if p.as_os_str().is_empty() {
                break;
            }
            if self.is_match(p) {
                return true;
            }
            current = p.parent();
        }
        false
    }
}

/// An ordered list of globs; the first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<GlobPattern>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| GlobPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GlobPattern> {
        self.patterns.iter()
    }

    pub fn first_match(&self, path: &Path) -> Option<&GlobPattern> {
        self.patterns.iter().find(|p| p.is_match(path))
    }

    pub fn matches_self_or_ancestor(&self, path: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_self_or_ancestor(path))
    }
}

/// Validate that a glob pattern is well formed and can be compiled.
pub fn validate_glob_pattern(pattern: &str) -> Result<()> {
    let reject = |details: &str| {
        Err(SweepError::InvalidGlob {
            pattern: pattern.to_string(),
            details: details.to_string(),
        })
    };
    if pattern.trim().is_empty() {
        return reject("pattern is empty");
    }
    if pattern.contains('\0') {
        return reject("pattern contains a NUL byte");
    }
    if pattern.contains("***") {
        return reject("more than two consecutive '*'");
    }
    if pattern.starts_with('/') {
        return reject("patterns are root-relative; drop the leading '/'");
    }
    glob_to_regex(pattern).map(|_| ())
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let normalized_pattern = pattern.replace('\\', "/");
    let mut regex_str = String::with_capacity(pattern.len() * 2);
    regex_str.push('^');

    let chars: Vec<char> = normalized_pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| SweepError::InvalidGlob {
        pattern: pattern.to_string(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> GlobPattern {
        GlobPattern::new(p).unwrap()
    }

    #[test]
    fn star_stays_within_component() {
        let g = glob("build/*.o");
        assert!(g.is_match(Path::new("build/main.o")));
        assert!(!g.is_match(Path::new("build/sub/main.o")));
    }

    #[test]
    fn double_star_crosses_components() {
        let g = glob("**/__pycache__/**");
        assert!(g.is_match(Path::new("__pycache__/app.cpython-312.pyc")));
        assert!(g.is_match(Path::new("pkg/sub/__pycache__/x.pyc")));
        assert!(!g.is_match(Path::new("pkg/pycache/x.pyc")));
    }

    #[test]
    fn basename_patterns_match_at_any_depth() {
        let g = glob("*.pyc");
        assert!(g.is_match(Path::new("old_cache.pyc")));
        assert!(g.is_match(Path::new("a/b/c.pyc")));
        assert!(!g.is_match(Path::new("a/b/c.py")));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let g = glob("tmp/build-?");
        assert!(g.is_match(Path::new("tmp/build-A")));
        assert!(!g.is_match(Path::new("tmp/build-AB")));
        assert!(!g.is_match(Path::new("tmp/build-")));
    }

    #[test]
    fn brackets_are_literal() {
        let g = glob("tmp/[build]");
        assert!(g.is_match(Path::new("tmp/[build]")));
        assert!(!g.is_match(Path::new("tmp/b")));
    }

    #[test]
    fn ancestor_matching_covers_subtrees() {
        let g = glob("static/vendor");
        assert!(g.matches_self_or_ancestor(Path::new("static/vendor/jquery.js")));
        assert!(g.matches_self_or_ancestor(Path::new("static/vendor")));
        assert!(!g.matches_self_or_ancestor(Path::new("static/vendors/x.js")));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        for bad in ["", "   ", "a/***/b", "/abs/path", "nul\0byte"] {
            let err = validate_glob_pattern(bad).unwrap_err();
            assert_eq!(err.code(), "RSW-1004", "pattern {bad:?}");
        }
    }

    #[test]
    fn pattern_set_reports_first_match() {
        let set = PatternSet::new(&["*.log", "**/*.pyc", "*.pyc"]).unwrap();
        let hit = set.first_match(Path::new("a/b.pyc")).unwrap();
        assert_eq!(hit.as_str(), "**/*.pyc");
        assert!(set.first_match(Path::new("a/b.py")).is_none());
        assert_eq!(set.len(), 3);
    }
}
