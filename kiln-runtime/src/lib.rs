//! kiln runtime: runs workflows against a live project.
//!
//! [`WorkflowCoordinator`] owns the executor, the collaborator servers and the
//! source watcher, and is what the `kiln` binary drives. [`init_tracing`]
//! installs the log subscriber.

pub mod coordinator;
pub mod error;
pub mod logging;
pub mod server;
pub mod watcher;

pub use coordinator::{run_blocking, WorkflowCoordinator};
pub use error::RuntimeError;
pub use logging::{init_tracing, LogFormat};
pub use server::{ServerHandle, ServerLauncher};
pub use watcher::{rules_for_batch, standard_rules, CompiledRule, WatchRule, Watcher};
