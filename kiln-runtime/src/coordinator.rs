//! Workflow coordination.
//!
//! [`WorkflowCoordinator::run`] validates a workflow's plan, then executes its
//! steps top to bottom. Phases go through the [`Executor`]; servers, keep-alive
//! and watch steps are handled here. A termination signal (Ctrl-C, SIGTERM)
//! or a send on [`WorkflowCoordinator::shutdown_handle`] ends keep-alive and
//! watch steps normally and interrupts anything else.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use kiln_build::{plan, standard_registry, validate, Executor, PhaseRegistry, RunReport, Step};
use kiln_core::manifest::ServerSettings;
use kiln_core::{ConfigContext, Manifest, Workflow};

use crate::error::{io_err, RuntimeError};
use crate::server::{ServerHandle, ServerLauncher};
use crate::watcher::{standard_rules, WatchRule, Watcher};

// ---------------------------------------------------------------------------
// 1. Coordinator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WorkflowCoordinator {
    executor: Executor,
    servers: ServerLauncher,
    watcher: Watcher,
    shutdown: broadcast::Sender<()>,
}

impl WorkflowCoordinator {
    /// The standard phase set and watch rules for the project at
    /// `project_dir`.
    pub fn new(manifest: &Manifest, project_dir: &Path) -> Result<Self, RuntimeError> {
        let registry = standard_registry(manifest)?;
        let config = manifest.context(project_dir)?;
        Self::from_parts(
            registry,
            config,
            &manifest.server,
            &standard_rules(),
            Duration::from_millis(manifest.watch.debounce_ms),
        )
    }

    pub fn from_parts(
        registry: PhaseRegistry,
        config: ConfigContext,
        servers: &ServerSettings,
        rules: &[WatchRule],
        debounce: Duration,
    ) -> Result<Self, RuntimeError> {
        let executor = Executor::new(Arc::new(registry), config);
        let watcher = Watcher::new(executor.clone(), rules, debounce)?;
        let (shutdown, _) = broadcast::channel(16);
        Ok(Self {
            executor,
            servers: ServerLauncher::new(servers)?,
            watcher,
            shutdown,
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn plan(&self, workflow: Workflow) -> Vec<Step> {
        plan(workflow)
    }

    /// Sending on the returned channel stops the running workflow.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Run `workflow` to completion; the outcome is in the report.
    pub async fn run(&mut self, workflow: Workflow) -> RunReport {
        let mut report = RunReport::new(workflow.to_string());
        let _ = self.run_with_report(workflow, &mut report).await;
        report
    }

    /// Like [`run`](Self::run), but also returns the failure itself.
    pub async fn run_with_report(
        &mut self,
        workflow: Workflow,
        report: &mut RunReport,
    ) -> Result<(), RuntimeError> {
        report.start();
        let steps = plan(workflow);
        tracing::info!(workflow = %workflow, steps = steps.len(), "starting workflow");

        let signals = spawn_signal_handler(self.shutdown.clone());
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut servers = Vec::new();

        let result = match self.check(&steps) {
            Ok(()) => self.execute(&steps, report, &mut servers, &mut shutdown_rx).await,
            Err(err) => Err(err),
        };

        for server in servers.drain(..) {
            server.stop().await;
        }
        signals.abort();

        report.finish(result.as_ref().map(|_| ()));
        match &result {
            Ok(()) => tracing::info!(workflow = %workflow, duration_ms = report.duration_ms, "workflow succeeded"),
            Err(err) => tracing::error!(workflow = %workflow, error = %err, "workflow failed"),
        }
        result
    }

    /// Every phase the plan or the watcher can reach must exist, and no
    /// parallel group may overlap.
    fn check(&self, steps: &[Step]) -> Result<(), RuntimeError> {
        validate(steps, self.executor.registry(), self.executor.config())?;
        if steps.contains(&Step::Watch) {
            for name in self.watcher.phase_names() {
                self.executor.registry().require(name)?;
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        steps: &[Step],
        report: &mut RunReport,
        servers: &mut Vec<ServerHandle>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), RuntimeError> {
        let config = self.executor.config();
        for step in steps {
            tracing::debug!(step = %step, "step");
            match step {
                Step::Phase(name) => {
                    interruptible(shutdown, self.executor.run_phase(name, report)).await?;
                }
                Step::Parallel(names) => {
                    interruptible(shutdown, self.executor.run_parallel(names, report)).await?;
                }
                Step::StartServer(kind) => {
                    let handle = interruptible(shutdown, self.servers.start(*kind, config)).await?;
                    servers.push(handle);
                }
                Step::KeepAlive => {
                    tracing::info!("running until terminated");
                    tokio::select! {
                        _ = shutdown.recv() => {}
                        err = server_exit(servers) => return Err(err),
                    }
                }
                Step::Watch => {
                    let watch = self.watcher.watch(shutdown.resubscribe());
                    tokio::select! {
                        result = watch => result?,
                        err = server_exit(servers) => return Err(err),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Run `workflow` for the project at `project_dir` on a new multi-thread
/// runtime, blocking the current thread until it finishes.
pub fn run_blocking(
    manifest: &Manifest,
    project_dir: &Path,
    workflow: Workflow,
) -> Result<RunReport, RuntimeError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async {
        let mut coordinator = WorkflowCoordinator::new(manifest, project_dir)?;
        Ok::<_, RuntimeError>(coordinator.run(workflow).await)
    })
}

// ---------------------------------------------------------------------------
// 2. Helpers
// ---------------------------------------------------------------------------

async fn interruptible<T, E>(
    shutdown: &mut broadcast::Receiver<()>,
    work: impl Future<Output = Result<T, E>>,
) -> Result<T, RuntimeError>
where
    E: Into<RuntimeError>,
{
    tokio::select! {
        result = work => result.map_err(Into::into),
        _ = shutdown.recv() => Err(RuntimeError::Interrupted),
    }
}

/// Resolves when the most recently started server exits; never, if none is
/// running.
async fn server_exit(servers: &mut [ServerHandle]) -> RuntimeError {
    match servers.last_mut() {
        Some(server) => server.exited().await,
        None => std::future::pending().await,
    }
}

fn spawn_signal_handler(shutdown: broadcast::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown_rx = shutdown.subscribe();
        tokio::select! {
            _ = shutdown_rx.recv() => {}
            _ = termination() => {
                tracing::info!("received termination signal, shutting down");
                let _ = shutdown.send(());
            }
        }
    })
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM handler unavailable");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination() {
    ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{ServeTarget, TestTarget};
    use tempfile::TempDir;

    #[test]
    fn standard_coordinator_builds_from_defaults() {
        let project = TempDir::new().unwrap();
        let coordinator = WorkflowCoordinator::new(&Manifest::default(), project.path()).unwrap();
        assert_eq!(coordinator.executor().registry().len(), 16);
        assert_eq!(coordinator.plan(Workflow::Build).len(), 12);
        assert_eq!(
            coordinator.plan(Workflow::Serve(ServeTarget::Live)).last(),
            Some(&Step::Watch)
        );
    }

    #[test]
    fn default_plans_validate_against_standard_registry() {
        let project = TempDir::new().unwrap();
        let coordinator = WorkflowCoordinator::new(&Manifest::default(), project.path()).unwrap();
        for workflow in [
            Workflow::Serve(ServeTarget::Live),
            Workflow::Serve(ServeTarget::Dist),
            Workflow::Test(TestTarget::Full),
            Workflow::Test(TestTarget::Watch),
            Workflow::Build,
            Workflow::Default,
        ] {
            coordinator
                .check(&coordinator.plan(workflow))
                .unwrap_or_else(|e| panic!("{workflow}: {e}"));
        }
    }

    #[tokio::test]
    async fn pending_shutdown_before_keep_alive_ends_cleanly() {
        let project = TempDir::new().unwrap();
        let coordinator = WorkflowCoordinator::from_parts(
            PhaseRegistry::new(),
            Manifest::default().context(project.path()).unwrap(),
            &ServerSettings::default(),
            &[],
            Duration::from_millis(10),
        )
        .unwrap();

        let mut report = RunReport::new("keep-alive");
        report.start();
        let mut servers = Vec::new();
        let mut shutdown_rx = coordinator.shutdown.subscribe();
        coordinator.shutdown_handle().send(()).unwrap();
        coordinator
            .execute(&[Step::KeepAlive], &mut report, &mut servers, &mut shutdown_rx)
            .await
            .unwrap();
    }
}
