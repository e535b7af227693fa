//! Command context: the serializable payload command templates render against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use kiln_core::ConfigContext;

use crate::error::RenderError;

/// Variables available to a command template.
///
/// | Name          | Meaning                                              |
/// |---------------|------------------------------------------------------|
/// | `paths.*`     | resolved path variables (`paths.source`, ...)        |
/// | `inputs`      | the phase's resolved input globs                     |
/// | `output`      | the phase's resolved output location                 |
/// | `input`       | current file (per-file / per-bundle fan-out only)    |
/// | `relative`    | `input` relative to its glob base                    |
/// | `target`      | where `input` should end up under `output`           |
/// | `target_dir`  | parent directory of `target`                         |
/// | `server.*`    | `hostname`, `port`, `url` of the server being driven |
///
/// All paths are relative to the project directory, which is also the
/// working directory of the spawned program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandContext {
    pub paths: BTreeMap<String, String>,
    pub inputs: Vec<String>,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerCtx>,
}

/// A single file being processed by a fan-out phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCtx {
    pub input: String,
    pub relative: String,
    pub target: String,
    pub target_dir: String,
}

/// Address of the collaborator server a command talks to (or is).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCtx {
    pub hostname: String,
    pub port: u16,
    pub url: String,
}

impl ServerCtx {
    pub fn new(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            url: format!("http://{hostname}:{port}"),
        }
    }
}

impl CommandContext {
    /// Context exposing only the resolved `paths`.
    pub fn new(config: &ConfigContext) -> Self {
        Self {
            paths: config.vars().clone(),
            inputs: Vec::new(),
            output: String::new(),
            input: None,
            relative: None,
            target: None,
            target_dir: None,
            server: None,
        }
    }

    pub fn with_phase(mut self, inputs: Vec<String>, output: String) -> Self {
        self.inputs = inputs;
        self.output = output;
        self
    }

    pub fn with_file(mut self, file: FileCtx) -> Self {
        self.input = Some(file.input);
        self.relative = Some(file.relative);
        self.target = Some(file.target);
        self.target_dir = Some(file.target_dir);
        self
    }

    pub fn with_server(mut self, server: ServerCtx) -> Self {
        self.server = Some(server);
        self
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::manifest::default_paths;

    #[test]
    fn paths_come_from_config() {
        let config = ConfigContext::new("/p", &default_paths()).expect("config");
        let ctx = CommandContext::new(&config);
        assert_eq!(ctx.paths["staging"], "var");
        assert!(ctx.input.is_none());
    }

    #[test]
    fn server_url_is_derived() {
        let server = ServerCtx::new("localhost", 9001);
        assert_eq!(server.url, "http://localhost:9001");
    }

    #[test]
    fn to_tera_context_succeeds() {
        let config = ConfigContext::new("/p", &default_paths()).expect("config");
        let ctx = CommandContext::new(&config)
            .with_phase(vec!["src/**/*.css".into()], "var/css".into())
            .with_file(FileCtx {
                input: "src/a.css".into(),
                relative: "a.css".into(),
                target: "var/css/a.css".into(),
                target_dir: "var/css".into(),
            });
        let tera_ctx = ctx.to_tera_context().expect("context conversion");
        assert!(tera_ctx.contains_key("target"));
        assert!(tera_ctx.contains_key("paths"));
    }
}
