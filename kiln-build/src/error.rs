//! Error types for kiln-build.

use std::path::PathBuf;

use thiserror::Error;

use kiln_core::{ConfigError, PhaseName};
use kiln_renderer::RenderError;

/// Errors raised by the registry and the executor.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Two phases registered under the same name.
    #[error("phase '{name}' is already registered")]
    DuplicateName { name: PhaseName },

    /// A plan or watch rule named a phase that was never registered.
    #[error("unknown phase '{name}'")]
    UnknownPhase { name: PhaseName },

    /// A registered phase ran and failed.
    #[error("phase '{name}' failed: {cause}")]
    PhaseExecution {
        name: PhaseName,
        #[source]
        cause: PhaseFailure,
    },

    /// Two members of one parallel group write to overlapping locations.
    #[error("phases '{first}' and '{second}' write to overlapping outputs ({path}) in the same parallel group")]
    OutputConflict {
        first: PhaseName,
        second: PhaseName,
        path: PathBuf,
    },

    /// A phase's command templates failed to compile at registration.
    #[error("invalid command template for phase '{name}': {source}")]
    Template {
        name: PhaseName,
        #[source]
        source: RenderError,
    },

    /// A phase template referenced an undefined path variable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Why a single phase action failed.
#[derive(Debug, Error)]
pub enum PhaseFailure {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The collaborator ran and exited unsuccessfully.
    #[error("`{program}` exited with {status}{}", stderr_suffix(.stderr))]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The collaborator could not be started at all.
    #[error("failed to start `{program}`: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command template error: {0}")]
    Render(#[from] RenderError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Minification plan or revision manifest could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A destructive phase matched a path that is the project directory or
    /// lies outside it.
    #[error("refusing to touch {path}: not inside the project directory")]
    OutsideProject { path: PathBuf },

    /// A minification bundle could not be assembled.
    #[error("{0}")]
    Plan(String),

    /// The blocking task running the phase panicked or was cancelled.
    #[error("phase task did not complete: {0}")]
    Join(String),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Convenience constructor for [`PhaseFailure::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PhaseFailure {
    PhaseFailure::Io {
        path: path.into(),
        source,
    }
}
