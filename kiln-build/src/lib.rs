//! kiln build library: phase registry, phase actions, workflow plans, and
//! the executor.
//!
//! # Entry points
//!
//! - [`standard_registry`] registers the standard phase set from a manifest.
//! - [`plan`] returns the [`Step`]s of a workflow; [`validate`] checks them
//!   against a registry before anything runs.
//! - [`Executor`] runs phase steps and records a [`RunReport`].
//!
//! Phases exchange data only through files: `useminPrepare` writes the
//! minification plan, `concat` and the minifiers read it, `rev` writes the
//! revision manifest that `usemin` reads.

pub mod error;
pub mod executor;
pub mod fsops;
pub mod plan;
pub mod registry;
pub mod revision;
pub mod standard;
pub mod tool;
pub mod usemin;

pub use error::{BuildError, PhaseFailure};
pub use executor::{Executor, OutcomeStatus, PhaseOutcome, RunReport};
pub use plan::{phase_names, plan, validate, ServerKind, Step};
pub use registry::{Phase, PhaseAction, PhaseInvocation, PhaseRegistry};
pub use standard::{names, standard_registry};
pub use tool::{run_command, FanOut, ToolAction};
