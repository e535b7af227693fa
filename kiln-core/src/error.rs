//! Error types for kiln-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or resolving project configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A template referenced a variable that is not defined.
    #[error("unresolved reference '${{{variable}}}' in '{referenced_by}'")]
    UnresolvedReference {
        variable: String,
        referenced_by: String,
    },

    /// Resolving a variable would recurse forever. `cycle` lists the chain,
    /// starting and ending with the same name.
    #[error("cyclic reference: {}", cycle.join(" -> "))]
    CyclicReference { cycle: Vec<String> },

    /// Substitution produced a value that itself reads as a reference.
    #[error("value of '{variable}' forms a new reference after substitution: '{value}'")]
    SplicedReference { variable: String, value: String },

    /// Underlying I/O failure while reading or writing the manifest.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the manifest path.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `kiln init` refuses to clobber an existing manifest.
    #[error("manifest already exists at {path}")]
    ManifestExists { path: PathBuf },

    /// A glob pattern failed to compile.
    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
