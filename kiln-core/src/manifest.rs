//! Project manifest (`kiln.yaml`).
//!
//! # Layout
//!
//! ```yaml
//! paths:            # ${name} templates, resolved into a ConfigContext
//!   source: src
//!   dist: dist
//!   staging: var
//! server:
//!   hostname: localhost
//!   port: 9000
//!   test_port: 9001
//! tools:
//!   compass:
//!     program: sass
//!     args: ["--no-source-map", "{{ paths.source }}/{{ paths.styles }}:{{ output }}"]
//! watch:
//!   debounce_ms: 200
//! ```
//!
//! Every section is optional. Missing `paths` entries fall back to the
//! defaults in [`default_paths`]; a missing tool entry keeps its default
//! command.
//!
//! # API pattern
//!
//! As with the rest of the workspace, functions take the path explicitly
//! (`load_at`, `save_at`, `init_at`) so tests can point them at a `TempDir`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::ConfigContext;
use crate::error::{io_err, ConfigError};
use crate::resolver::VarMap;

/// File name looked up in the project directory.
pub const MANIFEST_FILE: &str = "kiln.yaml";

// ---------------------------------------------------------------------------
// 1. Schema
// ---------------------------------------------------------------------------

/// An external program and its argument templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }
}

/// Collaborator servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub hostname: String,
    /// Port for the live-reload and dist servers.
    pub port: u16,
    /// Port for the test server.
    pub test_port: u16,
    /// How long to wait for a server to answer HTTP before giving up.
    pub ready_timeout_secs: u64,
    pub livereload: CommandSpec,
    pub test: CommandSpec,
    pub dist: CommandSpec,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 9000,
            test_port: 9001,
            ready_timeout_secs: 15,
            livereload: CommandSpec::new(
                "live-server",
                &[
                    "{{ paths.staging }}",
                    "--mount=/:{{ paths.source }}",
                    "--host={{ server.hostname }}",
                    "--port={{ server.port }}",
                ],
            ),
            test: CommandSpec::new(
                "live-server",
                &[
                    "{{ paths.staging }}",
                    "--mount=/:{{ paths.test }}",
                    "--mount=/:{{ paths.source }}",
                    "--host={{ server.hostname }}",
                    "--port={{ server.port }}",
                    "--no-browser",
                    "--no-css-inject",
                ],
            ),
            dist: CommandSpec::new(
                "live-server",
                &[
                    "{{ paths.dist }}",
                    "--host={{ server.hostname }}",
                    "--port={{ server.port }}",
                    "--no-css-inject",
                    "--ignore={{ paths.dist }}",
                ],
            ),
        }
    }
}

/// Commands for every external phase collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Style compiler (runs once over the styles directory).
    pub compass: CommandSpec,
    /// Vendor prefixer (runs once per staged stylesheet).
    pub autoprefixer: CommandSpec,
    /// Image compressor (runs once per source image).
    pub imagemin: CommandSpec,
    /// Stylesheet minifier (runs once per css bundle).
    pub cssmin: CommandSpec,
    /// Script minifier (runs once per js bundle).
    pub uglify: CommandSpec,
    /// Feature-detection bundle generator.
    pub modernizr: CommandSpec,
    /// Markup minifier (runs once per dist html file, in place).
    pub htmlmin: CommandSpec,
    /// Browser test runner pointed at the test server.
    pub mocha: CommandSpec,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            compass: CommandSpec::new(
                "sass",
                &[
                    "--no-source-map",
                    "--load-path={{ paths.source }}/bower_components",
                    "{{ paths.source }}/{{ paths.styles }}:{{ output }}",
                ],
            ),
            autoprefixer: CommandSpec::new(
                "postcss",
                &["{{ input }}", "--use", "autoprefixer", "--replace", "--no-map"],
            )
            .with_env("BROWSERSLIST", "last 1 version"),
            imagemin: CommandSpec::new("imagemin", &["{{ input }}", "--out-dir={{ target_dir }}"]),
            cssmin: CommandSpec::new("cleancss", &["-o", "{{ target }}", "{{ input }}"]),
            uglify: CommandSpec::new(
                "terser",
                &["{{ input }}", "--compress", "--mangle", "--output", "{{ target }}"],
            ),
            modernizr: CommandSpec::new(
                "modernizr",
                &[
                    "--config",
                    "{{ paths.source }}/modernizr-config.json",
                    "--uglify",
                    "--dest",
                    "{{ output }}/modernizr.js",
                ],
            ),
            htmlmin: CommandSpec::new(
                "html-minifier-terser",
                &[
                    "--collapse-boolean-attributes",
                    "--collapse-whitespace",
                    "--remove-attribute-quotes",
                    "--remove-comments-from-cdata",
                    "--remove-empty-attributes",
                    "--remove-optional-tags",
                    "--remove-redundant-attributes",
                    "--use-short-doctype",
                    "-o",
                    "{{ target }}",
                    "{{ input }}",
                ],
            ),
            mocha: CommandSpec::new("mocha-headless-chrome", &["-f", "{{ server.url }}/index.html"]),
        }
    }
}

/// Watcher tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Quiet period that closes a batch of file changes.
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { debounce_ms: 200 }
    }
}

/// Root of `kiln.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Manifest {
    pub paths: BTreeMap<String, String>,
    pub server: ServerSettings,
    pub tools: ToolSettings,
    pub watch: WatchSettings,
}

/// Built-in path variables.
pub fn default_paths() -> VarMap {
    [
        ("source", "src"),
        ("dist", "dist"),
        ("staging", "var"),
        ("scripts", "scripts"),
        ("styles", "styles"),
        ("images", "images"),
        ("test", "test"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Manifest {
    /// A manifest with every default spelled out (what `kiln init` writes).
    pub fn scaffold() -> Self {
        Self {
            paths: default_paths(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with the manifest's own `paths`.
    pub fn variables(&self) -> VarMap {
        let mut vars = default_paths();
        vars.extend(self.paths.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    /// Resolve this manifest's variables into a [`ConfigContext`] rooted at
    /// `project_dir`.
    pub fn context(&self, project_dir: &Path) -> Result<ConfigContext, ConfigError> {
        ConfigContext::new(project_dir, &self.variables())
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// `<project_dir>/kiln.yaml`. Pure, no I/O.
pub fn manifest_path_at(project_dir: &Path) -> PathBuf {
    project_dir.join(MANIFEST_FILE)
}

/// Load the manifest at `path`.
///
/// Returns `ConfigError::Io` if unreadable and `ConfigError::Parse`
/// (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<Manifest, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(Manifest::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load `path` if it exists, otherwise return the defaults.
pub fn load_or_default(path: &Path) -> Result<Manifest, ConfigError> {
    if path.exists() {
        load_at(path)
    } else {
        Ok(Manifest::default())
    }
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `manifest` to `path`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `rename`.
pub fn save_at(path: &Path, manifest: &Manifest) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    let tmp_path = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(manifest)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Write a scaffold manifest into `project_dir`.
///
/// Never overwrites: returns `ConfigError::ManifestExists` if one is present.
pub fn init_at(project_dir: &Path) -> Result<PathBuf, ConfigError> {
    let path = manifest_path_at(project_dir);
    if path.exists() {
        return Err(ConfigError::ManifestExists { path });
    }
    save_at(&path, &Manifest::scaffold())?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
