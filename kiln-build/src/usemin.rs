//! Markup-driven bundling: annotation scanning, concatenation, and reference
//! rewriting.
//!
//! Markup marks groups of assets with build blocks:
//!
//! ```html
//! <!-- build:css styles/main.css -->
//! <link rel="stylesheet" href="styles/a.css">
//! <link rel="stylesheet" href="styles/b.css">
//! <!-- endbuild -->
//! ```
//!
//! [`PrepareAction`] collects every block into a [`MinifyPlan`] JSON file under
//! the staging root; [`ConcatAction`] joins each bundle's sources;
//! minifier tools consume the bundles; [`RewriteAction`] finally replaces each
//! block in dist markup with one tag and applies the revision manifest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use kiln_core::ConfigContext;

use crate::error::{io_err, PhaseFailure};
use crate::registry::{run_blocking, PhaseAction, PhaseInvocation};
use crate::revision::RevManifest;

// ---------------------------------------------------------------------------
// 1. Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Css,
    Js,
}

impl BundleKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "css" => Some(BundleKind::Css),
            "js" => Some(BundleKind::Js),
            _ => None,
        }
    }

    /// What goes between two concatenated sources.
    fn separator(self) -> &'static str {
        match self {
            BundleKind::Css => "\n",
            BundleKind::Js => ";\n",
        }
    }

    /// The single tag that replaces a build block.
    fn tag(self, dest: &str) -> String {
        match self {
            BundleKind::Css => format!(r#"<link rel="stylesheet" href="{dest}">"#),
            BundleKind::Js => format!(r#"<script src="{dest}"></script>"#),
        }
    }
}

/// One build block: `sources` are concatenated into `dest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub kind: BundleKind,
    /// Output path relative to the distribution root.
    pub dest: String,
    /// Asset references exactly as written in the markup.
    pub sources: Vec<String>,
    /// Markup file the block came from, relative to its glob base.
    pub markup: String,
}

/// On-disk minification plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinifyPlan {
    pub bundles: Vec<Bundle>,
}

impl MinifyPlan {
    pub fn load(path: &Path) -> Result<Self, PhaseFailure> {
        let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Atomic write: `<path>.tmp`, then rename.
    pub fn save(&self, path: &Path) -> Result<(), PhaseFailure> {
        write_json_atomic(path, &serde_json::to_string_pretty(self)?)
    }

    pub fn bundle(&self, dest: &str) -> Option<&Bundle> {
        self.bundles.iter().find(|b| b.dest == dest)
    }
}

pub(crate) fn write_json_atomic(path: &Path, json: &str) -> Result<(), PhaseFailure> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Markup scanning
// ---------------------------------------------------------------------------

/// Compiled patterns for build blocks and asset references.
#[derive(Debug)]
struct Patterns {
    block: Regex,
    reference: Regex,
    css_url: Regex,
}

impl Patterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // <!-- build:js(alt,paths) scripts/main.js --> ... <!-- endbuild -->
            block: Regex::new(
                r"(?s)<!--\s*build:(\w+)(?:\([^)]*\))?\s+(\S+)\s*-->(.*?)<!--\s*endbuild\s*-->",
            )?,
            // Leading whitespace keeps `data-src=` and friends out.
            reference: Regex::new(r#"(\s(?:href|src)\s*=\s*)(["']?)([^"'\s>]+)(["']?)"#)?,
            css_url: Regex::new(r#"(url\(\s*)(["']?)([^"')\s]+)(["']?)(\s*\))"#)?,
        })
    }
}

fn patterns() -> Result<Patterns, PhaseFailure> {
    Patterns::new().map_err(|e| PhaseFailure::Plan(format!("invalid built-in pattern: {e}")))
}

/// Extract every css/js build block from `markup`. Blocks of any other kind
/// are skipped.
pub fn scan_blocks(markup: &str, markup_name: &str) -> Result<Vec<Bundle>, PhaseFailure> {
    let patterns = patterns()?;
    let mut bundles = Vec::new();
    for caps in patterns.block.captures_iter(markup) {
        let Some(kind) = BundleKind::parse(&caps[1]) else {
            tracing::warn!(markup = markup_name, kind = &caps[1], "ignoring unsupported build block");
            continue;
        };
        let sources = patterns
            .reference
            .captures_iter(&caps[3])
            .map(|r| r[3].to_string())
            .collect();
        bundles.push(Bundle {
            kind,
            dest: caps[2].to_string(),
            sources,
            markup: markup_name.to_string(),
        });
    }
    Ok(bundles)
}

// ---------------------------------------------------------------------------
// 3. useminPrepare
// ---------------------------------------------------------------------------

/// Scans the input markup and writes the plan to the phase output.
#[derive(Debug, Clone, Default)]
pub struct PrepareAction;

impl PrepareAction {
    fn execute(invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let mut plan = MinifyPlan::default();
        for file in invocation.matched_files()? {
            let markup = fs::read_to_string(&file.path).map_err(|e| io_err(&file.path, e))?;
            let name = file.relative.to_string_lossy();
            for bundle in scan_blocks(&markup, &name)? {
                match plan.bundle(&bundle.dest) {
                    Some(existing) if existing.sources != bundle.sources => {
                        tracing::warn!(
                            dest = %bundle.dest,
                            first = %existing.markup,
                            second = %bundle.markup,
                            "bundle declared twice with different sources; keeping the first"
                        );
                    }
                    Some(_) => {}
                    None => plan.bundles.push(bundle),
                }
            }
        }

        let output = invocation.output_path();
        plan.save(&output)?;
        tracing::info!(bundles = plan.bundles.len(), plan = %invocation.output, "minification plan written");
        Ok(())
    }
}

#[async_trait]
impl PhaseAction for PrepareAction {
    fn kind(&self) -> String {
        "usemin-prepare".into()
    }

    async fn run(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let invocation = invocation.clone();
        run_blocking(move || Self::execute(&invocation)).await
    }
}

// ---------------------------------------------------------------------------
// 4. concat
// ---------------------------------------------------------------------------

/// Joins each bundle's sources into `<output>/<dest>`.
///
/// The plan path is the first phase input; sources are looked up below each
/// of `search_roots` in turn.
#[derive(Debug, Clone)]
pub struct ConcatAction {
    search_roots: Arc<Vec<String>>,
}

impl ConcatAction {
    pub fn new<S: Into<String>>(search_roots: impl IntoIterator<Item = S>) -> Self {
        Self {
            search_roots: Arc::new(search_roots.into_iter().map(Into::into).collect()),
        }
    }

    fn execute(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let plan_input = invocation
            .includes()
            .next()
            .ok_or_else(|| PhaseFailure::Plan("concat has no plan input".into()))?;
        let plan = MinifyPlan::load(&invocation.root().join(plan_input))?;
        let roots = self.resolved_roots(&invocation.config)?;
        let output = invocation.output_path();

        for bundle in &plan.bundles {
            let mut joined = String::new();
            for (i, source) in bundle.sources.iter().enumerate() {
                let path = locate(&roots, source).ok_or_else(|| {
                    PhaseFailure::Plan(format!(
                        "bundle '{}': source '{}' not found under {}",
                        bundle.dest,
                        source,
                        self.search_roots.join(", ")
                    ))
                })?;
                let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
                if i > 0 {
                    joined.push_str(bundle.kind.separator());
                }
                joined.push_str(contents.trim_end());
            }
            joined.push('\n');

            let target = output.join(&bundle.dest);
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            }
            fs::write(&target, joined).map_err(|e| io_err(&target, e))?;
            tracing::debug!(dest = %bundle.dest, sources = bundle.sources.len(), "bundle concatenated");
        }
        tracing::info!(bundles = plan.bundles.len(), "concatenated");
        Ok(())
    }

    fn resolved_roots(&self, config: &ConfigContext) -> Result<Vec<PathBuf>, PhaseFailure> {
        self.search_roots
            .iter()
            .map(|r| config.expand_path(r).map_err(PhaseFailure::from))
            .collect()
    }
}

/// First existing `root/<reference>` with query and fragment dropped.
fn locate(roots: &[PathBuf], reference: &str) -> Option<PathBuf> {
    let relative = strip_query(reference).trim_start_matches('/');
    roots
        .iter()
        .map(|root| root.join(relative))
        .find(|candidate| candidate.is_file())
}

fn strip_query(reference: &str) -> &str {
    reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference)
}

#[async_trait]
impl PhaseAction for ConcatAction {
    fn kind(&self) -> String {
        "concat".into()
    }

    async fn run(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let this = self.clone();
        let invocation = invocation.clone();
        run_blocking(move || this.execute(&invocation)).await
    }
}

// ---------------------------------------------------------------------------
// 5. usemin
// ---------------------------------------------------------------------------

/// Rewrites dist markup and stylesheets in place.
///
/// Markup: every build block becomes a single tag for its bundle. Markup and
/// stylesheets: every `href`/`src`/`url()` reference to a file renamed by
/// the revision phase points at the new name.
#[derive(Debug, Clone)]
pub struct RewriteAction {
    rev_manifest: String,
}

impl RewriteAction {
    /// `rev_manifest` is the template of the revision manifest path.
    pub fn new(rev_manifest: impl Into<String>) -> Self {
        Self {
            rev_manifest: rev_manifest.into(),
        }
    }

    fn execute(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let manifest_path = invocation.config.expand_path(&self.rev_manifest)?;
        let renames = if manifest_path.exists() {
            RevManifest::load(&manifest_path)?.files
        } else {
            tracing::debug!(path = %manifest_path.display(), "no revision manifest; only collapsing blocks");
            BTreeMap::new()
        };

        let patterns = patterns()?;
        let dist = invocation.output_path();
        let mut rewritten = 0usize;

        for file in invocation.matched_files()? {
            let original = fs::read_to_string(&file.path).map_err(|e| io_err(&file.path, e))?;
            let dir_in_dist = file
                .path
                .parent()
                .and_then(|p| p.strip_prefix(&dist).ok())
                .map(Path::to_path_buf)
                .unwrap_or_default();

            let is_css = file.path.extension().is_some_and(|e| e == "css");
            let updated = if is_css {
                rewrite_css(&patterns, &original, &dir_in_dist, &renames)
            } else {
                let collapsed = collapse_blocks(&patterns, &original);
                rewrite_markup(&patterns, &collapsed, &dir_in_dist, &renames)
            };

            if updated != original {
                fs::write(&file.path, &updated).map_err(|e| io_err(&file.path, e))?;
                rewritten += 1;
                tracing::debug!(file = %invocation.display_path(&file.path), "references rewritten");
            }
        }
        tracing::info!(files = rewritten, "usemin rewrite complete");
        Ok(())
    }
}

#[async_trait]
impl PhaseAction for RewriteAction {
    fn kind(&self) -> String {
        "usemin".into()
    }

    async fn run(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let this = self.clone();
        let invocation = invocation.clone();
        run_blocking(move || this.execute(&invocation)).await
    }
}

fn collapse_blocks(patterns: &Patterns, markup: &str) -> String {
    patterns
        .block
        .replace_all(markup, |caps: &Captures| match BundleKind::parse(&caps[1]) {
            Some(kind) => kind.tag(&caps[2]),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn rewrite_markup(
    patterns: &Patterns,
    markup: &str,
    dir: &Path,
    renames: &BTreeMap<String, String>,
) -> String {
    patterns
        .reference
        .replace_all(markup, |caps: &Captures| {
            let reference = &caps[3];
            match revved_reference(reference, dir, renames) {
                Some(new) => format!("{}{}{}{}", &caps[1], &caps[2], new, &caps[4]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn rewrite_css(
    patterns: &Patterns,
    css: &str,
    dir: &Path,
    renames: &BTreeMap<String, String>,
) -> String {
    patterns
        .css_url
        .replace_all(css, |caps: &Captures| {
            let reference = &caps[3];
            match revved_reference(reference, dir, renames) {
                Some(new) => format!("{}{}{}{}{}", &caps[1], &caps[2], new, &caps[4], &caps[5]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// The reference with its file name swapped for the revved one, if the file
/// it points to was renamed.
///
/// Candidates are, in order: the reference resolved against the referring
/// file's directory, then against the distribution root.
fn revved_reference(
    reference: &str,
    dir: &Path,
    renames: &BTreeMap<String, String>,
) -> Option<String> {
    if reference.contains("://") || reference.starts_with("//") || reference.starts_with("data:") {
        return None;
    }
    let path_part = strip_query(reference);
    let suffix = &reference[path_part.len()..];
    let trimmed = path_part.trim_start_matches('/');

    let candidates = [normalize_join(dir, trimmed), normalize_join(Path::new(""), trimmed)];
    let revved = candidates
        .iter()
        .flatten()
        .find_map(|candidate| renames.get(candidate))?;

    let new_name = Path::new(revved).file_name()?.to_string_lossy();
    let new_path = match path_part.rfind('/') {
        Some(i) => format!("{}{}", &path_part[..=i], new_name),
        None => new_name.into_owned(),
    };
    Some(format!("{new_path}{suffix}"))
}

/// `dir/relative` with `.` and `..` folded, as a `/`-separated string.
/// `None` if `..` climbs above `dir`'s root.
fn normalize_join(dir: &Path, relative: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in dir.join(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop()?;
            }
            _ => {}
        }
    }
    Some(parts.join("/"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"<html>
<head>
  <!-- build:css styles/main.css -->
  <link rel="stylesheet" href="styles/a.css">
  <link rel="stylesheet" href="css/b.css">
  <!-- endbuild -->
</head>
<body>
  <!-- build:js({var,src}) scripts/main.js -->
  <script src="scripts/app.js"></script>
  <script src="/scripts/util.js?v=2"></script>
  <!-- endbuild -->
  <!-- build:remove -->
  <script src="dev-only.js"></script>
  <!-- endbuild -->
</body>
</html>"#;

    #[test]
    fn scan_collects_css_and_js_blocks() {
        let bundles = scan_blocks(INDEX, "index.html").unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].kind, BundleKind::Css);
        assert_eq!(bundles[0].dest, "styles/main.css");
        assert_eq!(bundles[0].sources, vec!["styles/a.css", "css/b.css"]);
        assert_eq!(bundles[1].kind, BundleKind::Js);
        assert_eq!(bundles[1].dest, "scripts/main.js");
        assert_eq!(bundles[1].sources, vec!["scripts/app.js", "/scripts/util.js?v=2"]);
    }

    #[test]
    fn collapse_replaces_blocks_with_single_tags() {
        let out = collapse_blocks(&patterns().unwrap(), INDEX);
        assert!(out.contains(r#"<link rel="stylesheet" href="styles/main.css">"#));
        assert!(out.contains(r#"<script src="scripts/main.js"></script>"#));
        assert!(!out.contains("styles/a.css"));
        assert!(out.contains("dev-only.js"), "unknown blocks are left alone");
    }

    #[test]
    fn references_follow_renames() {
        let renames: BTreeMap<String, String> = [
            ("styles/main.css", "styles/0badc0de.main.css"),
            ("images/logo.png", "images/1234abcd.logo.png"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
        let p = patterns().unwrap();

        let html = r#"<link rel="stylesheet" href="styles/main.css"><img src="http://cdn/x.png">"#;
        assert_eq!(
            rewrite_markup(&p, html, Path::new(""), &renames),
            r#"<link rel="stylesheet" href="styles/0badc0de.main.css"><img src="http://cdn/x.png">"#
        );

        let css = "body { background: url('../images/logo.png?#iefix') }";
        assert_eq!(
            rewrite_css(&p, css, Path::new("styles"), &renames),
            "body { background: url('../images/1234abcd.logo.png?#iefix') }"
        );
    }

    #[test]
    fn data_attributes_are_not_references() {
        let renames: BTreeMap<String, String> =
            [("images/a.png".to_string(), "images/0badc0de.a.png".to_string())].into();
        let p = patterns().unwrap();
        let html = r#"<img data-src="images/a.png" src="images/a.png">"#;
        assert_eq!(
            rewrite_markup(&p, html, Path::new(""), &renames),
            r#"<img data-src="images/a.png" src="images/0badc0de.a.png">"#
        );

        let block = "<!-- build:js scripts/main.js -->\n<script data-src=\"lazy.js\" src=\"app.js\"></script>\n<!-- endbuild -->";
        let bundles = scan_blocks(block, "index.html").unwrap();
        assert_eq!(bundles[0].sources, vec!["app.js"]);
    }

    #[test]
    fn normalize_join_folds_parent_dirs() {
        assert_eq!(
            normalize_join(Path::new("styles"), "../images/a.png").as_deref(),
            Some("images/a.png")
        );
        assert_eq!(normalize_join(Path::new(""), "../x"), None);
    }

    #[test]
    fn locate_prefers_earlier_roots() {
        let dir = tempfile::TempDir::new().unwrap();
        let staging = dir.path().join("var");
        let source = dir.path().join("src");
        fs::create_dir_all(staging.join("styles")).unwrap();
        fs::create_dir_all(source.join("styles")).unwrap();
        fs::write(staging.join("styles/a.css"), "staged").unwrap();
        fs::write(source.join("styles/a.css"), "raw").unwrap();
        fs::write(source.join("styles/b.css"), "raw").unwrap();

        let roots = vec![staging.clone(), source.clone()];
        assert_eq!(locate(&roots, "styles/a.css"), Some(staging.join("styles/a.css")));
        assert_eq!(locate(&roots, "/styles/b.css?x=1"), Some(source.join("styles/b.css")));
        assert_eq!(locate(&roots, "styles/c.css"), None);
    }
}
