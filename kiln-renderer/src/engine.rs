//! Tera command engine: [`CommandTemplate`] and [`RenderedCommand`].
//!
//! Each argument (and each environment value) of a [`CommandSpec`] is
//! registered as its own raw Tera template, named `<phase>/arg<N>` or
//! `<phase>/env/<KEY>`, so a syntax error is reported against the exact
//! argument that caused it. Undefined variables are render-time errors.

use std::collections::BTreeMap;

use tera::Tera;

use kiln_core::CommandSpec;

use crate::context::CommandContext;
use crate::error::RenderError;

/// A concrete command line, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl RenderedCommand {
    /// Shell-ish one-line rendering for logs.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Compiled templates for one collaborator command.
#[derive(Debug)]
pub struct CommandTemplate {
    name: String,
    tera: Tera,
    program: String,
    arg_count: usize,
    env_keys: Vec<String>,
}

impl CommandTemplate {
    /// Compile every argument and env template of `spec`.
    pub fn compile(name: &str, spec: &CommandSpec) -> Result<Self, RenderError> {
        let mut templates: Vec<(String, String)> = Vec::new();
        templates.push((program_key(name), spec.program.clone()));
        for (i, arg) in spec.args.iter().enumerate() {
            templates.push((arg_key(name, i), arg.clone()));
        }
        for (key, value) in &spec.env {
            templates.push((env_key(name, key), value.clone()));
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(templates)?;

        Ok(Self {
            name: name.to_string(),
            tera,
            program: spec.program.clone(),
            arg_count: spec.args.len(),
            env_keys: spec.env.keys().cloned().collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unrendered program name, for diagnostics.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Render the command line for one invocation.
    pub fn render(&self, ctx: &CommandContext) -> Result<RenderedCommand, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;

        let program = self.tera.render(&program_key(&self.name), &tera_ctx)?;
        let program = program.trim().to_string();
        if program.is_empty() {
            return Err(RenderError::EmptyProgram {
                name: self.name.clone(),
            });
        }

        let mut args = Vec::with_capacity(self.arg_count);
        for i in 0..self.arg_count {
            args.push(self.tera.render(&arg_key(&self.name, i), &tera_ctx)?);
        }

        let mut env = BTreeMap::new();
        for key in &self.env_keys {
            env.insert(key.clone(), self.tera.render(&env_key(&self.name, key), &tera_ctx)?);
        }

        Ok(RenderedCommand { program, args, env })
    }
}

fn program_key(name: &str) -> String {
    format!("{name}/program")
}

fn arg_key(name: &str, index: usize) -> String {
    format!("{name}/arg{index}")
}

fn env_key(name: &str, key: &str) -> String {
    format!("{name}/env/{key}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
