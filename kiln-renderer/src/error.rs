//! Error types for kiln-renderer.

use thiserror::Error;

/// All errors that can arise while compiling or rendering command templates.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error (syntax on compile, undefined variable on render).
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The rendered program name was empty.
    #[error("command template '{name}' rendered an empty program")]
    EmptyProgram { name: String },
}
