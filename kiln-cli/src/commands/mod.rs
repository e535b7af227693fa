pub mod init;
pub mod phases;
pub mod plan;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};

use kiln_core::manifest::{load_or_default, manifest_path_at};
use kiln_core::Manifest;

use crate::GlobalArgs;

/// The project directory, resolved to an absolute path.
pub(crate) fn project_dir(global: &GlobalArgs) -> Result<PathBuf> {
    global
        .project_dir
        .canonicalize()
        .with_context(|| format!("cannot resolve project dir '{}'", global.project_dir.display()))
}

/// `--config`, or `kiln.yaml` in the project directory. Defaults apply when
/// the file does not exist.
pub(crate) fn load_manifest(global: &GlobalArgs, project_dir: &std::path::Path) -> Result<Manifest> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(|| manifest_path_at(project_dir));
    load_or_default(&path).with_context(|| format!("failed to load '{}'", path.display()))
}
