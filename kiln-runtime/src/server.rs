//! Collaborator servers: launch, readiness, shutdown.
//!
//! Servers are external programs whose command lines are rendered like tool
//! commands, with `server.*` bound to the address for their [`ServerKind`].
//! A server counts as ready once it answers any HTTP request.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::Instant;

use kiln_build::ServerKind;
use kiln_core::manifest::ServerSettings;
use kiln_core::ConfigContext;
use kiln_renderer::{CommandContext, CommandTemplate, RenderedCommand, ServerCtx};

use crate::error::RuntimeError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_TIMEOUT: Duration = Duration::from_millis(500);

/// A running server. The process is killed when the handle is dropped.
#[derive(Debug)]
pub struct ServerHandle {
    kind: ServerKind,
    url: String,
    child: Child,
}

impl ServerHandle {
    pub fn kind(&self) -> ServerKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolves when the process exits, as the error that exit represents.
    pub async fn exited(&mut self) -> RuntimeError {
        let status = match self.child.wait().await {
            Ok(status) => status.to_string(),
            Err(err) => err.to_string(),
        };
        RuntimeError::ServerExited {
            kind: self.kind,
            status,
        }
    }

    /// Kill the process and reap it.
    pub async fn stop(mut self) {
        if let Err(err) = self.child.kill().await {
            tracing::debug!(server = %self.kind, error = %err, "server already gone");
        }
        tracing::info!(server = %self.kind, "server stopped");
    }
}

/// Renders and starts the configured servers.
#[derive(Debug)]
pub struct ServerLauncher {
    templates: HashMap<ServerKind, CommandTemplate>,
    hostname: String,
    port: u16,
    test_port: u16,
    ready_timeout: Duration,
}

impl ServerLauncher {
    pub fn new(settings: &ServerSettings) -> Result<Self, RuntimeError> {
        let mut templates = HashMap::new();
        for (kind, spec) in [
            (ServerKind::LiveReload, &settings.livereload),
            (ServerKind::Test, &settings.test),
            (ServerKind::Dist, &settings.dist),
        ] {
            let template = CommandTemplate::compile(&format!("server:{kind}"), spec)
                .map_err(|source| RuntimeError::ServerTemplate { kind, source })?;
            templates.insert(kind, template);
        }
        Ok(Self {
            templates,
            hostname: settings.hostname.clone(),
            port: settings.port,
            test_port: settings.test_port,
            ready_timeout: Duration::from_secs(settings.ready_timeout_secs),
        })
    }

    /// Address the server of `kind` listens on.
    pub fn address(&self, kind: ServerKind) -> ServerCtx {
        let port = match kind {
            ServerKind::Test => self.test_port,
            ServerKind::LiveReload | ServerKind::Dist => self.port,
        };
        ServerCtx::new(&self.hostname, port)
    }

    pub fn command(
        &self,
        kind: ServerKind,
        config: &ConfigContext,
    ) -> Result<RenderedCommand, RuntimeError> {
        let ctx = CommandContext::new(config).with_server(self.address(kind));
        let template = self.templates.get(&kind).ok_or_else(|| RuntimeError::ServerExited {
            kind,
            status: "no command configured".to_string(),
        })?;
        template
            .render(&ctx)
            .map_err(|source| RuntimeError::ServerTemplate { kind, source })
    }

    /// Spawn the server and wait until it answers HTTP.
    pub async fn start(
        &self,
        kind: ServerKind,
        config: &ConfigContext,
    ) -> Result<ServerHandle, RuntimeError> {
        let command = self.command(kind, config)?;
        let url = format!("{}/", self.address(kind).url);
        tracing::info!(server = %kind, command = %command.display_line(), "starting server");

        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .current_dir(config.root())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::ServerSpawn {
                kind,
                program: command.program.clone(),
                source,
            })?;

        let mut handle = ServerHandle { kind, url, child };
        self.wait_ready(&mut handle).await?;
        tracing::info!(server = %kind, url = %handle.url, "server ready");
        Ok(handle)
    }

    async fn wait_ready(&self, handle: &mut ServerHandle) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if let Ok(Some(status)) = handle.child.try_wait() {
                return Err(RuntimeError::ServerExited {
                    kind: handle.kind,
                    status: status.to_string(),
                });
            }

            let url = handle.url.clone();
            let answered = tokio::task::spawn_blocking(move || answers(&url))
                .await
                .unwrap_or(false);
            if answered {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(RuntimeError::ServerNotReady {
                    kind: handle.kind,
                    url: handle.url.clone(),
                    timeout_secs: self.ready_timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// True if anything at `url` answered with an HTTP response, error
/// statuses included.
fn answers(url: &str) -> bool {
    match ureq::get(url).timeout(READY_TIMEOUT).call() {
        Ok(_) | Err(ureq::Error::Status(_, _)) => true,
        Err(ureq::Error::Transport(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::manifest::default_paths;
    use kiln_core::CommandSpec;
    use tempfile::TempDir;

    fn settings() -> ServerSettings {
        ServerSettings {
            ready_timeout_secs: 1,
            ..ServerSettings::default()
        }
    }

    #[test]
    fn test_server_uses_test_port() {
        let launcher = ServerLauncher::new(&settings()).unwrap();
        assert_eq!(launcher.address(ServerKind::Test).port, 9001);
        assert_eq!(launcher.address(ServerKind::Dist).port, 9000);
        assert_eq!(
            launcher.address(ServerKind::LiveReload).url,
            "http://localhost:9000"
        );
    }

    #[test]
    fn default_commands_render() {
        let launcher = ServerLauncher::new(&settings()).unwrap();
        let config = ConfigContext::new("/p", &default_paths()).unwrap();
        let dist = launcher.command(ServerKind::Dist, &config).unwrap();
        assert_eq!(dist.program, "live-server");
        assert_eq!(dist.args[0], "dist");
        assert!(dist.args.contains(&"--port=9000".to_string()));

        let test = launcher.command(ServerKind::Test, &config).unwrap();
        assert!(test.args.contains(&"--mount=/:test".to_string()));
        assert!(test.args.contains(&"--port=9001".to_string()));
    }

    #[tokio::test]
    async fn server_exiting_early_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings();
        settings.test = CommandSpec::new("sh", &["-c", "exit 0"]);
        settings.test_port = 1;
        let launcher = ServerLauncher::new(&settings).unwrap();
        let config = ConfigContext::new(dir.path(), &default_paths()).unwrap();

        let err = launcher.start(ServerKind::Test, &config).await.unwrap_err();
        assert!(
            matches!(
                err,
                RuntimeError::ServerExited { .. } | RuntimeError::ServerNotReady { .. }
            ),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings();
        settings.dist = CommandSpec::new("sleep", &["30"]);
        settings.port = 1;
        let launcher = ServerLauncher::new(&settings).unwrap();
        let config = ConfigContext::new(dir.path(), &default_paths()).unwrap();

        let err = launcher.start(ServerKind::Dist, &config).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ServerNotReady { timeout_secs: 1, .. }));
    }

    #[test]
    fn refused_connection_is_not_ready() {
        assert!(!answers("http://127.0.0.1:1/"));
    }
}
