//! External collaborators: [`ToolAction`].
//!
//! A tool is a [`CommandTemplate`] plus a [`FanOut`] mode deciding how many
//! times it is spawned per phase run. Commands run with the project directory
//! as working directory, sequentially, stopping at the first failure.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use kiln_core::CommandSpec;
use kiln_renderer::{CommandContext, CommandTemplate, FileCtx, RenderError, RenderedCommand, ServerCtx};

use crate::error::{io_err, PhaseFailure};
use crate::registry::{PhaseAction, PhaseInvocation};
use crate::usemin::{BundleKind, MinifyPlan};

/// How many commands one phase run produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOut {
    /// A single command for the whole phase.
    Once,
    /// One command per file matched by the phase inputs. A file already
    /// below the output keeps its path there (in-place tools); any other
    /// file lands at its path below the glob base.
    EachFile,
    /// One command per bundle of `kind` in the minification plan found at
    /// the `plan` template. The first phase input is the directory holding
    /// the concatenated bundles.
    EachBundle { kind: BundleKind, plan: String },
}

/// Runs an external program for a phase.
#[derive(Debug)]
pub struct ToolAction {
    template: CommandTemplate,
    fan_out: FanOut,
    server: Option<ServerCtx>,
    stream_output: bool,
}

impl ToolAction {
    pub fn new(name: &str, spec: &CommandSpec, fan_out: FanOut) -> Result<Self, RenderError> {
        Ok(Self {
            template: CommandTemplate::compile(name, spec)?,
            fan_out,
            server: None,
            stream_output: false,
        })
    }

    /// Expose `server.*` to the templates.
    pub fn with_server(mut self, server: ServerCtx) -> Self {
        self.server = Some(server);
        self
    }

    /// Let the child write straight to the terminal instead of capturing
    /// its output (test runners).
    pub fn streaming(mut self) -> Self {
        self.stream_output = true;
        self
    }

    fn base_context(&self, invocation: &PhaseInvocation) -> CommandContext {
        let ctx = CommandContext::new(&invocation.config)
            .with_phase(invocation.inputs.clone(), invocation.output.clone());
        match &self.server {
            Some(server) => ctx.with_server(server.clone()),
            None => ctx,
        }
    }

    /// Render every command this run will spawn, in order.
    pub fn commands(&self, invocation: &PhaseInvocation) -> Result<Vec<RenderedCommand>, PhaseFailure> {
        Ok(self
            .planned(invocation)?
            .into_iter()
            .map(|(command, _)| command)
            .collect())
    }

    /// Commands paired with the directory their target lands in, if any.
    fn planned(
        &self,
        invocation: &PhaseInvocation,
    ) -> Result<Vec<(RenderedCommand, Option<String>)>, PhaseFailure> {
        let base = self.base_context(invocation);
        let mut commands = Vec::new();

        match &self.fan_out {
            FanOut::Once => {
                let command = self.template.render(&base)?;
                commands.push((command, Some(invocation.output.clone())));
            }
            FanOut::EachFile => {
                let output = invocation.output_path();
                for file in invocation.matched_files()? {
                    let below_output = match file.path.strip_prefix(&output) {
                        Ok(rel) if !rel.as_os_str().is_empty() => rel,
                        _ => file.relative.as_path(),
                    };
                    let target = Path::new(&invocation.output).join(below_output);
                    let file_ctx = FileCtx {
                        input: invocation.display_path(&file.path),
                        relative: file.relative.to_string_lossy().into_owned(),
                        target_dir: parent_of(&target),
                        target: target.to_string_lossy().into_owned(),
                    };
                    let target_dir = file_ctx.target_dir.clone();
                    let command = self.template.render(&base.clone().with_file(file_ctx))?;
                    commands.push((command, Some(target_dir)));
                }
            }
            FanOut::EachBundle { kind, plan } => {
                let plan_path = invocation.config.expand_path(plan)?;
                let plan = MinifyPlan::load(&plan_path)?;
                let bundle_dir = invocation.includes().next().unwrap_or_default().to_string();
                for bundle in plan.bundles.iter().filter(|b| b.kind == *kind) {
                    let target = Path::new(&invocation.output).join(&bundle.dest);
                    let file_ctx = FileCtx {
                        input: Path::new(&bundle_dir)
                            .join(&bundle.dest)
                            .to_string_lossy()
                            .into_owned(),
                        relative: bundle.dest.clone(),
                        target_dir: parent_of(&target),
                        target: target.to_string_lossy().into_owned(),
                    };
                    let target_dir = file_ctx.target_dir.clone();
                    let command = self.template.render(&base.clone().with_file(file_ctx))?;
                    commands.push((command, Some(target_dir)));
                }
            }
        }
        Ok(commands)
    }
}

fn parent_of(path: &Path) -> String {
    path.parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl PhaseAction for ToolAction {
    fn kind(&self) -> String {
        let mode = match self.fan_out {
            FanOut::Once => "once",
            FanOut::EachFile => "each file",
            FanOut::EachBundle { kind: BundleKind::Css, .. } => "each css bundle",
            FanOut::EachBundle { kind: BundleKind::Js, .. } => "each js bundle",
        };
        format!("tool:{} ({mode})", self.template.program())
    }

    async fn run(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure> {
        let commands = self.planned(invocation)?;
        if commands.is_empty() {
            tracing::info!(phase = %invocation.name, "no matching inputs; nothing to run");
            return Ok(());
        }

        for (command, target_dir) in &commands {
            if let Some(dir) = target_dir.as_deref().filter(|d| !d.is_empty()) {
                let dir = invocation.root().join(dir);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| io_err(&dir, e))?;
            }
            run_command(invocation.root(), command, self.stream_output).await?;
        }
        tracing::debug!(phase = %invocation.name, commands = commands.len(), "tool finished");
        Ok(())
    }
}

/// Spawn `command` in `cwd` and wait for it.
///
/// With `stream` unset, stdout is logged at debug level and stderr is kept
/// for the failure report. The child is killed if this future is dropped.
pub async fn run_command(
    cwd: &Path,
    command: &RenderedCommand,
    stream: bool,
) -> Result<(), PhaseFailure> {
    tracing::info!(command = %command.display_line(), "running");

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(&command.env)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    if stream {
        let status = cmd
            .status()
            .await
            .map_err(|source| PhaseFailure::ToolSpawn {
                program: command.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(PhaseFailure::ToolFailed {
                program: command.program.clone(),
                status: status.to_string(),
                stderr: String::new(),
            });
        }
        return Ok(());
    }

    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| PhaseFailure::ToolSpawn {
            program: command.program.clone(),
            source,
        })?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        tracing::debug!(program = %command.program, "{line}");
    }

    if !output.status.success() {
        return Err(PhaseFailure::ToolFailed {
            program: command.program.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
