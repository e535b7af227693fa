//! kiln core library: path configuration, the manifest and shared types.
//!
//! - [`resolver`]: `${name}` template resolution
//! - [`context`]: [`ConfigContext`], the immutable resolved configuration
//! - [`manifest`]: `kiln.yaml` load / save / init
//! - [`glob`]: brace expansion and file matching
//! - [`types`]: newtypes and workflow enums
//! - [`error`]: [`ConfigError`]

pub mod context;
pub mod error;
pub mod glob;
pub mod manifest;
pub mod resolver;
pub mod types;

pub use context::ConfigContext;
pub use error::ConfigError;
pub use manifest::{CommandSpec, Manifest};
pub use resolver::VarMap;
pub use types::{PhaseName, RunState, ServeTarget, TestTarget, Workflow};
