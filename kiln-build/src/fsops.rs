//! Native file-system phases: clean and copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use kiln_core::glob::{find_files, find_paths};

use crate::error::{io_err, PhaseFailure};
use crate::registry::{run_blocking, PhaseAction, PhaseInvocation};

// ---------------------------------------------------------------------------
// 1. clean
// ---------------------------------------------------------------------------

/// Removes every file or directory matched by the inputs, except those
/// matched by a `!` input.
///
/// Only paths strictly inside the project directory are removed; anything
/// else fails the phase before a single path is deleted.
#[derive(Debug, Clone, Default)]
pub struct CleanAction;

impl CleanAction {
    fn execute(invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let root = fs::canonicalize(invocation.root()).map_err(|e| io_err(invocation.root(), e))?;
        let exclusions = invocation.exclusions()?;

        let includes: Vec<&str> = invocation.includes().collect();
        let mut doomed = Vec::new();
        for path in find_paths(invocation.root(), &includes, false)? {
            if exclusions.matches(&path) {
                tracing::debug!(path = %invocation.display_path(&path), "kept");
                continue;
            }
            let location = located(&path).map_err(|e| io_err(&path, e))?;
            if location == root || !location.starts_with(&root) {
                return Err(PhaseFailure::OutsideProject { path: location });
            }
            doomed.push(path);
        }

        let mut removed = 0usize;
        for path in doomed {
            let is_dir = fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir());
            let result = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        tracing::info!(phase = %invocation.name, removed, "cleaned");
        Ok(())
    }
}

/// Where `path` itself lives: the parent is canonicalized, the last
/// component is kept, so a symlink is judged by its own location.
fn located(path: &Path) -> io::Result<PathBuf> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            Ok(fs::canonicalize(parent)?.join(name))
        }
        _ => fs::canonicalize(path),
    }
}

#[async_trait]
impl PhaseAction for CleanAction {
    fn kind(&self) -> String {
        "clean".into()
    }

    async fn run(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let invocation = invocation.clone();
        run_blocking(move || Self::execute(&invocation)).await
    }
}

// ---------------------------------------------------------------------------
// 2. copy
// ---------------------------------------------------------------------------

/// One group of files to copy: globs relative to `cwd`, landing under
/// `<output>/<dest>` with their path below `cwd` preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    pub cwd: String,
    pub patterns: Vec<String>,
    pub dest: Option<String>,
}

impl CopySource {
    pub fn new(cwd: &str, patterns: &[&str]) -> Self {
        Self {
            cwd: cwd.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            dest: None,
        }
    }

    pub fn into_dir(mut self, dest: &str) -> Self {
        self.dest = Some(dest.to_string());
        self
    }

    /// `cwd/pattern` for every pattern, as declared phase inputs.
    pub fn inputs(&self) -> impl Iterator<Item = String> + '_ {
        self.patterns.iter().map(|p| format!("{}/{p}", self.cwd))
    }
}

/// Copies files whose destination is missing or older than the source.
#[derive(Debug, Clone)]
pub struct CopyAction {
    sources: Arc<Vec<CopySource>>,
}

impl CopyAction {
    pub fn new(sources: Vec<CopySource>) -> Self {
        Self {
            sources: Arc::new(sources),
        }
    }

    /// Declared inputs of every source.
    pub fn inputs(&self) -> Vec<String> {
        self.sources.iter().flat_map(CopySource::inputs).collect()
    }

    fn execute(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let output = invocation.output_path();
        let (mut copied, mut skipped) = (0usize, 0usize);

        for source in self.sources.iter() {
            let cwd = invocation.config.expand_path(&source.cwd)?;
            let dest_root = match &source.dest {
                Some(dest) => output.join(invocation.config.expand(dest)?),
                None => output.clone(),
            };
            let patterns = source
                .patterns
                .iter()
                .map(|p| invocation.config.expand(p))
                .collect::<Result<Vec<_>, _>>()?;

            for file in find_files(&cwd, &patterns)? {
                let Ok(relative) = file.strip_prefix(&cwd) else {
                    continue;
                };
                let target = dest_root.join(relative);
                if !is_newer(&file, &target)? {
                    skipped += 1;
                    continue;
                }
                if let Some(dir) = target.parent() {
                    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
                }
                fs::copy(&file, &target).map_err(|e| io_err(&file, e))?;
                copied += 1;
            }
        }
        tracing::info!(phase = %invocation.name, copied, skipped, "copied");
        Ok(())
    }
}

/// True when `target` does not exist or `source` was modified after it.
pub fn is_newer(source: &Path, target: &Path) -> Result<bool, PhaseFailure> {
    let target_modified = match fs::metadata(target) {
        Ok(meta) => meta.modified().map_err(|e| io_err(target, e))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(io_err(target, e)),
    };
    let source_modified = fs::metadata(source)
        .and_then(|m| m.modified())
        .map_err(|e| io_err(source, e))?;
    Ok(source_modified > target_modified)
}

#[async_trait]
impl PhaseAction for CopyAction {
    fn kind(&self) -> String {
        "copy".into()
    }

    async fn run(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let this = self.clone();
        let invocation = invocation.clone();
        run_blocking(move || this.execute(&invocation)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use filetime::{set_file_mtime, FileTime};
    use kiln_core::manifest::default_paths;
    use kiln_core::ConfigContext;
    use tempfile::TempDir;

    fn invocation(root: &Path, inputs: Vec<String>, output: &str) -> PhaseInvocation {
        PhaseInvocation {
            name: "test".into(),
            inputs,
            output: output.into(),
            config: ConfigContext::new(root, &default_paths()).unwrap(),
        }
    }

    #[tokio::test]
    async fn clean_keeps_negated_paths() {
        let dir = TempDir::new().unwrap();
        let dist = dir.path().join("dist");
        fs::create_dir_all(dist.join(".git")).unwrap();
        fs::create_dir_all(dist.join("styles")).unwrap();
        fs::write(dist.join(".gitignore"), "x").unwrap();
        fs::write(dist.join("index.html"), "x").unwrap();
        fs::create_dir_all(dir.path().join("var/styles")).unwrap();

        let inv = invocation(
            dir.path(),
            vec!["var".into(), "dist/*".into(), "!dist/.git*".into()],
            "dist",
        );
        CleanAction.run(&inv).await.expect("clean");

        assert!(!dir.path().join("var").exists());
        assert!(!dist.join("styles").exists());
        assert!(!dist.join("index.html").exists());
        assert!(dist.join(".git").is_dir());
        assert!(dist.join(".gitignore").is_file());
    }

    #[tokio::test]
    async fn clean_of_missing_location_is_ok() {
        let dir = TempDir::new().unwrap();
        let inv = invocation(dir.path(), vec!["var".into()], "var");
        CleanAction.run(&inv).await.expect("nothing to clean");
    }

    #[tokio::test]
    async fn clean_refuses_locations_outside_the_project() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        let precious = dir.path().join("precious");
        fs::create_dir_all(project.join("src")).unwrap();
        fs::create_dir_all(&precious).unwrap();
        fs::write(precious.join("data.txt"), "keep me").unwrap();

        let mut paths = default_paths();
        paths.insert("staging".into(), "../precious".into());
        let config = ConfigContext::new(&project, &paths).unwrap();
        let inv = PhaseInvocation {
            name: "clean:server".into(),
            inputs: vec![config.expand("${staging}").unwrap()],
            output: config.expand("${staging}").unwrap(),
            config,
        };

        let err = CleanAction.run(&inv).await.unwrap_err();
        assert!(matches!(err, PhaseFailure::OutsideProject { .. }), "{err}");
        assert!(precious.join("data.txt").is_file());
    }

    #[tokio::test]
    async fn clean_refuses_the_project_root_and_removes_nothing() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("var")).unwrap();
        fs::write(dir.path().join("index.html"), "x").unwrap();

        let inv = invocation(dir.path(), vec!["var".into(), ".".into()], "var");
        let err = CleanAction.run(&inv).await.unwrap_err();
        assert!(matches!(err, PhaseFailure::OutsideProject { .. }), "{err}");
        assert!(dir.path().join("var").is_dir(), "nothing removed once refused");
        assert!(dir.path().join("index.html").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_removes_a_symlink_not_its_target() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("data.txt"), "keep me").unwrap();
        fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("dist/linked")).unwrap();

        let inv = invocation(dir.path(), vec!["dist/*".into()], "dist");
        CleanAction.run(&inv).await.expect("clean");
        assert!(fs::symlink_metadata(dir.path().join("dist/linked")).is_err());
        assert!(outside.path().join("data.txt").is_file());
    }

    #[tokio::test]
    async fn copy_works_in_a_project_dir_with_glob_characters() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("site[v2]");
        fs::create_dir_all(project.join("src/styles")).unwrap();
        fs::write(project.join("src/styles/a.css"), "a").unwrap();

        let action = CopyAction::new(vec![CopySource::new("${source}/${styles}", &["{,*/}*.css"])]);
        let inv = invocation(&project, action.inputs(), "var/styles");
        action.run(&inv).await.expect("copy");
        assert!(project.join("var/styles/a.css").is_file());
    }

    #[tokio::test]
    async fn copy_preserves_relative_paths_under_dest() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("styles/vendor")).unwrap();
        fs::write(src.join("styles/a.css"), "a").unwrap();
        fs::write(src.join("styles/vendor/b.css"), "b").unwrap();
        fs::write(src.join("styles/c.scss"), "c").unwrap();

        let action = CopyAction::new(vec![
            CopySource::new("${source}/${styles}", &["{,*/}*.css"]).into_dir("${styles}"),
        ]);
        let inv = invocation(dir.path(), action.inputs(), "var");
        action.run(&inv).await.expect("copy");

        assert!(dir.path().join("var/styles/a.css").is_file());
        assert!(dir.path().join("var/styles/vendor/b.css").is_file());
        assert!(!dir.path().join("var/styles/c.scss").exists());
    }

    #[tokio::test]
    async fn copy_skips_when_destination_is_newer() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let out = dir.path().join("dist");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(src.join("robots.txt"), "fresh").unwrap();
        fs::write(out.join("robots.txt"), "minified").unwrap();

        let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3600));
        set_file_mtime(src.join("robots.txt"), old).unwrap();

        let action = CopyAction::new(vec![CopySource::new("${source}", &["*.txt"])]);
        let inv = invocation(dir.path(), action.inputs(), "dist");
        action.run(&inv).await.expect("copy");
        assert_eq!(fs::read_to_string(out.join("robots.txt")).unwrap(), "minified");

        let newer = FileTime::from_system_time(SystemTime::now() + Duration::from_secs(3600));
        set_file_mtime(src.join("robots.txt"), newer).unwrap();
        action.run(&inv).await.expect("copy");
        assert_eq!(fs::read_to_string(out.join("robots.txt")).unwrap(), "fresh");
    }

    #[test]
    fn declared_inputs_join_cwd_and_pattern() {
        let action = CopyAction::new(vec![
            CopySource::new("${source}", &["*.{ico,png,txt}", ".htaccess"]),
            CopySource::new("${staging}", &["${styles}/{,*/}*.css"]),
        ]);
        assert_eq!(
            action.inputs(),
            vec![
                "${source}/*.{ico,png,txt}",
                "${source}/.htaccess",
                "${staging}/${styles}/{,*/}*.css",
            ]
        );
    }
}
