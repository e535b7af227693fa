//! Domain types shared across kiln crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a registered phase (e.g. `copy:styles`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhaseName(pub String);

impl PhaseName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PhaseName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PhaseName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// Target of the `serve` workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServeTarget {
    /// Staging build with live-reload and the file watcher.
    #[default]
    Live,
    /// Full `build`, then serve the distribution root until terminated.
    Dist,
}

/// Target of the `test` workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestTarget {
    /// Clean and preprocess staging before testing.
    #[default]
    Full,
    /// Reuse whatever is already staged.
    Watch,
}

/// Every workflow the coordinator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "workflow", content = "target", rename_all = "lowercase")]
pub enum Workflow {
    Serve(ServeTarget),
    Test(TestTarget),
    Build,
    /// `test` followed by `build`.
    Default,
}

impl Workflow {
    /// Build a workflow from a command name and optional target
    /// (`("serve", Some("dist"))`).
    pub fn from_parts(name: &str, target: Option<&str>) -> Result<Self, String> {
        match (name, target) {
            ("serve", None) => Ok(Workflow::Serve(ServeTarget::Live)),
            ("serve", Some("dist")) => Ok(Workflow::Serve(ServeTarget::Dist)),
            ("test", None) => Ok(Workflow::Test(TestTarget::Full)),
            ("test", Some("watch")) => Ok(Workflow::Test(TestTarget::Watch)),
            ("build", None) => Ok(Workflow::Build),
            ("default", None) => Ok(Workflow::Default),
            (name @ ("serve" | "test" | "build" | "default"), Some(target)) => Err(format!(
                "unknown target '{target}' for workflow '{name}'"
            )),
            (other, _) => Err(format!(
                "unknown workflow '{other}'; expected: serve, test, build, default"
            )),
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workflow::Serve(ServeTarget::Live) => write!(f, "serve"),
            Workflow::Serve(ServeTarget::Dist) => write!(f, "serve:dist"),
            Workflow::Test(TestTarget::Full) => write!(f, "test"),
            Workflow::Test(TestTarget::Watch) => write!(f, "test:watch"),
            Workflow::Build => write!(f, "build"),
            Workflow::Default => write!(f, "default"),
        }
    }
}

/// Accepts the `name[:target]` form printed by [`Display`](fmt::Display).
impl FromStr for Workflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, target)) => Workflow::from_parts(name, Some(target)),
            None => Workflow::from_parts(s, None),
        }
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Lifecycle of a single workflow run. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    /// Move to `next` if the transition is legal; terminal states never change.
    pub fn advance(&mut self, next: RunState) -> bool {
        let legal = matches!(
            (*self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Running, RunState::Succeeded)
                | (RunState::Running, RunState::Failed)
        );
        if legal {
            *self = next;
        }
        legal
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running => write!(f, "running"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
