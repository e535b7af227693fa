//! Glob helpers shared by phases and the watcher.
//!
//! Patterns use the `glob` crate syntax (`*`, `**`, `?`, `[..]`) plus shell
//! style brace alternation (`*.{scss,sass}`, `{,*/}*.css`), which is expanded
//! before compilation.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::error::{io_err, ConfigError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Expand `{a,b}` alternations into every concrete pattern, in order.
///
/// A brace group without a comma is left untouched.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let mut out = Vec::new();
    expand_into(pattern, &mut out);
    let mut seen = std::collections::HashSet::new();
    out.retain(|p| seen.insert(p.clone()));
    out
}

fn expand_into(pattern: &str, out: &mut Vec<String>) {
    let Some(open) = pattern.find('{') else {
        out.push(pattern.to_string());
        return;
    };
    let Some(close) = matching_brace(pattern, open) else {
        out.push(pattern.to_string());
        return;
    };

    let prefix = &pattern[..open];
    let body = &pattern[open + 1..close];
    let suffix = &pattern[close + 1..];
    let alternatives = split_top_level(body);

    if alternatives.len() < 2 {
        let mut tails = Vec::new();
        expand_into(suffix, &mut tails);
        for tail in tails {
            out.push(format!("{prefix}{{{body}}}{tail}"));
        }
        return;
    }

    for alt in alternatives {
        expand_into(&format!("{prefix}{alt}{suffix}"), out);
    }
}

fn matching_brace(pattern: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in pattern[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// The leading pattern components that contain no wildcard.
///
/// `src/styles/**/*.css` → `src/styles`. Used as the base when computing a
/// matched file's relative path.
pub fn literal_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            break;
        }
        base.push(component);
    }
    base
}

/// `pattern` anchored below `root`.
///
/// The root is matched literally: its `*`, `?`, `[` and `]` are escaped.
/// Absolute patterns are returned unchanged. Braces must already be expanded.
pub fn rooted(root: &Path, pattern: &str) -> String {
    if Path::new(pattern).is_absolute() {
        return pattern.to_string();
    }
    let root = Pattern::escape(&root.to_string_lossy());
    let pattern = pattern.trim_start_matches("./");
    if pattern.is_empty() || pattern == "." {
        return root;
    }
    format!("{}/{pattern}", root.trim_end_matches('/'))
}

/// A compiled set of patterns; a path matches when any pattern does.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        Self::compile(patterns, |p| p.to_string())
    }

    /// Patterns relative to `root`, matched against absolute paths.
    pub fn rooted<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Self, ConfigError> {
        Self::compile(patterns, |p| rooted(root, p))
    }

    fn compile<S: AsRef<str>>(
        patterns: &[S],
        anchor: impl Fn(&str) -> String,
    ) -> Result<Self, ConfigError> {
        let mut compiled = Vec::new();
        for pattern in patterns {
            for expanded in expand_braces(pattern.as_ref()) {
                let anchored = anchor(&expanded);
                let p = Pattern::new(&anchored).map_err(|source| ConfigError::Pattern {
                    pattern: expanded.clone(),
                    source,
                })?;
                compiled.push(p);
            }
        }
        Ok(Self { patterns: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_path_with(path, MATCH_OPTIONS))
    }
}

/// Every regular file below `root` matching any of `patterns`, sorted and
/// de-duplicated.
pub fn find_files<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Vec<PathBuf>, ConfigError> {
    find_paths(root, patterns, true)
}

/// Like [`find_files`], but directories are returned too unless `files_only`.
pub fn find_paths<S: AsRef<str>>(
    root: &Path,
    patterns: &[S],
    files_only: bool,
) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = Vec::new();
    for pattern in patterns {
        for expanded in expand_braces(pattern.as_ref()) {
            let anchored = rooted(root, &expanded);
            let entries = glob::glob_with(&anchored, MATCH_OPTIONS).map_err(|source| {
                ConfigError::Pattern {
                    pattern: expanded.clone(),
                    source,
                }
            })?;
            for entry in entries {
                let path = entry.map_err(|e| {
                    let path = e.path().to_path_buf();
                    io_err(path, e.into_error())
                })?;
                if !files_only || path.is_file() {
                    files.push(path);
                }
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn braces_expand_in_order() {
        assert_eq!(
            expand_braces("src/*.{scss,sass}"),
            vec!["src/*.scss", "src/*.sass"]
        );
        assert_eq!(
            expand_braces("styles/{,*/}*.css"),
            vec!["styles/*.css", "styles/*/*.css"]
        );
    }

    #[test]
    fn multiple_and_nested_groups() {
        assert_eq!(
            expand_braces("{a,b}/{c,d}"),
            vec!["a/c", "a/d", "b/c", "b/d"]
        );
        assert_eq!(expand_braces("{a,{b,c}}.txt"), vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn single_alternative_is_literal() {
        assert_eq!(expand_braces("x{y}z"), vec!["x{y}z"]);
        assert_eq!(expand_braces("no-braces"), vec!["no-braces"]);
        assert_eq!(expand_braces("open{only"), vec!["open{only"]);
    }

    #[test]
    fn literal_base_stops_at_wildcards() {
        assert_eq!(literal_base("src/styles/**/*.css"), PathBuf::from("src/styles"));
        assert_eq!(literal_base("src/*.{ico,png}"), PathBuf::from("src"));
        assert_eq!(literal_base("*.html"), PathBuf::new());
    }

    #[test]
    fn pattern_set_respects_separators() {
        let set = PatternSet::new(&["src/scripts/*.js"]).expect("compile");
        assert!(set.matches(Path::new("src/scripts/app.js")));
        assert!(!set.matches(Path::new("src/scripts/vendor/lib.js")));

        let deep = PatternSet::new(&["src/styles/**/*.{scss,sass}"]).expect("compile");
        assert!(deep.matches(Path::new("src/styles/main.scss")));
        assert!(deep.matches(Path::new("src/styles/partials/_a.sass")));
        assert!(!deep.matches(Path::new("src/styles/main.css")));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = PatternSet::new(&["src/[oops"]).unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }));
    }

    #[test]
    fn find_files_walks_and_sorts() {
        let dir = TempDir::new().expect("tempdir");
        let styles = dir.path().join("styles");
        fs::create_dir_all(styles.join("nested")).unwrap();
        fs::write(styles.join("b.css"), "b").unwrap();
        fs::write(styles.join("a.css"), "a").unwrap();
        fs::write(styles.join("nested").join("c.css"), "c").unwrap();
        fs::write(styles.join("skip.scss"), "s").unwrap();

        let files = find_files(dir.path(), &["styles/**/*.css"]).expect("find");
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(&styles).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.css"),
                PathBuf::from("b.css"),
                PathBuf::from("nested/c.css"),
            ]
        );
    }

    #[test]
    fn root_with_glob_characters_is_literal() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("site[v2]{a,b}*");
        fs::create_dir_all(root.join("styles")).unwrap();
        fs::write(root.join("styles/a.css"), "a").unwrap();
        fs::write(root.join("styles/b.scss"), "b").unwrap();

        let files = find_files(&root, &["styles/*.{css,scss}"]).expect("find");
        assert_eq!(files, vec![root.join("styles/a.css"), root.join("styles/b.scss")]);

        let set = PatternSet::rooted(&root, &["styles/*.css"]).expect("compile");
        assert!(set.matches(&root.join("styles/a.css")));
        assert!(!set.matches(&dir.path().join("site2a/styles/a.css")));
    }

    #[test]
    fn rooted_keeps_absolute_patterns() {
        assert_eq!(rooted(Path::new("/p[1]"), "src/*.js"), "/p[[]1[]]/src/*.js");
        assert_eq!(rooted(Path::new("/p"), "/elsewhere/*.js"), "/elsewhere/*.js");
        assert_eq!(rooted(Path::new("/p"), "./var"), "/p/var");
        assert_eq!(rooted(Path::new("/p"), "."), "/p");
    }
}
