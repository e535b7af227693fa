//! Content-hash revisioning.
//!
//! Every file matched by the phase inputs is renamed in place to
//! `<hash8>.<name>`, where `hash8` is the first eight hex digits of the
//! SHA-256 of its contents. The renames are recorded in a [`RevManifest`]
//! keyed by path relative to the phase output.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, PhaseFailure};
use crate::registry::{run_blocking, PhaseAction, PhaseInvocation};
use crate::usemin::write_json_atomic;

/// Length of the hash prefix added to file names.
pub const HASH_LEN: usize = 8;

/// On-disk record of the last revision run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevManifest {
    pub generated_at: DateTime<Utc>,
    /// Original path → revved path, both relative to the output root and
    /// `/`-separated.
    pub files: BTreeMap<String, String>,
}

impl RevManifest {
    pub fn load(path: &Path) -> Result<Self, PhaseFailure> {
        let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), PhaseFailure> {
        write_json_atomic(path, &serde_json::to_string_pretty(self)?)
    }
}

/// Hex SHA-256 prefix of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let mut digest = hex::encode(h.finalize());
    digest.truncate(HASH_LEN);
    digest
}

/// Renames matched files and writes the manifest.
#[derive(Debug, Clone)]
pub struct RevAction {
    manifest: String,
}

impl RevAction {
    /// `manifest` is the template of the manifest path.
    pub fn new(manifest: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
        }
    }

    fn execute(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let output = invocation.output_path();
        let mut files = BTreeMap::new();

        for file in invocation.matched_files()? {
            let bytes = fs::read(&file.path).map_err(|e| io_err(&file.path, e))?;
            let Some(name) = file.path.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let renamed = file
                .path
                .with_file_name(format!("{}.{name}", content_hash(&bytes)));
            fs::rename(&file.path, &renamed).map_err(|e| io_err(&file.path, e))?;

            let from = relative_key(&output, &file.path);
            let to = relative_key(&output, &renamed);
            tracing::debug!(from = %from, to = %to, "revved");
            files.insert(from, to);
        }

        let manifest = RevManifest {
            generated_at: Utc::now(),
            files,
        };
        let manifest_path = invocation.config.expand_path(&self.manifest)?;
        manifest.save(&manifest_path)?;
        tracing::info!(files = manifest.files.len(), "revisioned");
        Ok(())
    }
}

fn relative_key(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl PhaseAction for RevAction {
    fn kind(&self) -> String {
        "rev".into()
    }

    async fn run(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let this = self.clone();
        let invocation = invocation.clone();
        run_blocking(move || this.execute(&invocation)).await
    }
}
