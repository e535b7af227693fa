//! # kiln-renderer
//!
//! Tera-based rendering of collaborator command lines.
//!
//! Every external phase is configured as a [`CommandSpec`](kiln_core::CommandSpec):
//! a program plus argument templates such as
//! `"{{ paths.source }}/{{ paths.styles }}:{{ output }}"`. A
//! [`CommandTemplate`] compiles those once and renders them per invocation
//! with a [`CommandContext`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kiln_core::{manifest::Manifest, ConfigContext};
//! use kiln_renderer::{CommandContext, CommandTemplate};
//!
//! fn render(ctx: &ConfigContext, manifest: &Manifest) {
//!     if let Ok(template) = CommandTemplate::compile("compass", &manifest.tools.compass) {
//!         let vars = CommandContext::new(ctx).with_phase(vec![], "var/styles".into());
//!         if let Ok(command) = template.render(&vars) {
//!             println!("{} {}", command.program, command.args.join(" "));
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{CommandContext, FileCtx, ServerCtx};
pub use engine::{CommandTemplate, RenderedCommand};
pub use error::RenderError;
