use std::path::PathBuf;

use thiserror::Error;

use kiln_build::{BuildError, ServerKind};
use kiln_core::ConfigError;
use kiln_renderer::RenderError;

/// Error surface for the coordinator, servers, and watcher.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid {kind} server command: {source}")]
    ServerTemplate {
        kind: ServerKind,
        #[source]
        source: RenderError,
    },

    #[error("failed to start {kind} server `{program}`: {source}")]
    ServerSpawn {
        kind: ServerKind,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The server process ended while the workflow still needed it.
    #[error("{kind} server exited unexpectedly ({status})")]
    ServerExited { kind: ServerKind, status: String },

    #[error("{kind} server did not answer at {url} within {timeout_secs}s")]
    ServerNotReady {
        kind: ServerKind,
        url: String,
        timeout_secs: u64,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted")]
    Interrupted,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        path: path.into(),
        source,
    }
}
