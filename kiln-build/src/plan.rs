//! Workflow plans: the ordered steps each [`Workflow`] runs.

use std::fmt;

use serde::Serialize;

use kiln_core::{ConfigContext, PhaseName, ServeTarget, TestTarget, Workflow};

use crate::error::BuildError;
use crate::registry::PhaseRegistry;
use crate::standard::names::*;

/// Which collaborator server a step launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// Staging + source with live-reload.
    LiveReload,
    /// Staging + test + source for the browser test runner.
    Test,
    /// The distribution root.
    Dist,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::LiveReload => write!(f, "livereload"),
            ServerKind::Test => write!(f, "test"),
            ServerKind::Dist => write!(f, "dist"),
        }
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "value", rename_all = "snake_case")]
pub enum Step {
    /// Run one phase; later steps wait for it.
    Phase(PhaseName),
    /// Run every phase concurrently; fail fast.
    Parallel(Vec<PhaseName>),
    /// Launch a server in the background and wait until it answers.
    StartServer(ServerKind),
    /// Block until terminated.
    KeepAlive,
    /// Hand control to the watcher until terminated.
    Watch,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Phase(name) => write!(f, "{name}"),
            Step::Parallel(names) => {
                let names: Vec<&str> = names.iter().map(PhaseName::as_str).collect();
                write!(f, "parallel [{}]", names.join(", "))
            }
            Step::StartServer(kind) => write!(f, "start server ({kind})"),
            Step::KeepAlive => write!(f, "keep alive"),
            Step::Watch => write!(f, "watch"),
        }
    }
}

fn phase(name: &str) -> Step {
    Step::Phase(PhaseName::from(name))
}

fn parallel(names: &[&str]) -> Step {
    Step::Parallel(names.iter().map(|n| PhaseName::from(*n)).collect())
}

/// The steps `workflow` runs, in order.
pub fn plan(workflow: Workflow) -> Vec<Step> {
    match workflow {
        Workflow::Serve(ServeTarget::Dist) => {
            let mut steps = build_plan();
            steps.push(Step::StartServer(ServerKind::Dist));
            steps.push(Step::KeepAlive);
            steps
        }
        Workflow::Serve(ServeTarget::Live) => vec![
            phase(CLEAN_SERVER),
            parallel(&[COMPASS, COPY_STYLES]),
            phase(AUTOPREFIXER),
            Step::StartServer(ServerKind::LiveReload),
            Step::Watch,
        ],
        Workflow::Test(target) => test_plan(target),
        Workflow::Build => build_plan(),
        Workflow::Default => {
            let mut steps = test_plan(TestTarget::Full);
            steps.extend(build_plan());
            steps
        }
    }
}

fn test_plan(target: TestTarget) -> Vec<Step> {
    let mut steps = Vec::new();
    if target != TestTarget::Watch {
        steps.push(phase(CLEAN_SERVER));
        steps.push(parallel(&[COPY_STYLES]));
        steps.push(phase(AUTOPREFIXER));
    }
    steps.push(Step::StartServer(ServerKind::Test));
    steps.push(phase(MOCHA));
    steps
}

fn build_plan() -> Vec<Step> {
    vec![
        phase(CLEAN_DIST),
        phase(USEMIN_PREPARE),
        parallel(&[COMPASS, COPY_STYLES, IMAGEMIN]),
        phase(AUTOPREFIXER),
        phase(CONCAT),
        phase(CSSMIN),
        phase(UGLIFY),
        phase(COPY_DIST),
        phase(MODERNIZR),
        phase(REV),
        phase(USEMIN),
        phase(HTMLMIN),
    ]
}

/// Every phase name a plan mentions, in order of appearance.
pub fn phase_names(steps: &[Step]) -> Vec<&PhaseName> {
    steps
        .iter()
        .flat_map(|step| match step {
            Step::Phase(name) => std::slice::from_ref(name),
            Step::Parallel(names) => names.as_slice(),
            _ => &[][..],
        })
        .collect()
}

/// Check a plan before anything runs: every phase must be registered and no
/// parallel group may have overlapping outputs.
pub fn validate(
    steps: &[Step],
    registry: &PhaseRegistry,
    config: &ConfigContext,
) -> Result<(), BuildError> {
    for name in phase_names(steps) {
        registry.require(name)?;
    }
    for step in steps {
        if let Step::Parallel(names) = step {
            registry.validate_group(names, config)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(steps: &[Step]) -> Vec<String> {
        steps.iter().map(Step::to_string).collect()
    }

    #[test]
    fn serve_live_ends_with_server_and_watch() {
        let steps = plan(Workflow::Serve(ServeTarget::Live));
        assert_eq!(
            names(&steps),
            vec![
                "clean:server",
                "parallel [compass, copy:styles]",
                "autoprefixer",
                "start server (livereload)",
                "watch",
            ]
        );
    }

    #[test]
    fn serve_dist_never_watches() {
        let steps = plan(Workflow::Serve(ServeTarget::Dist));
        assert!(!steps.contains(&Step::Watch));
        assert_eq!(steps[steps.len() - 2], Step::StartServer(ServerKind::Dist));
        assert_eq!(steps.last(), Some(&Step::KeepAlive));
        assert_eq!(&steps[..steps.len() - 2], plan(Workflow::Build).as_slice());
    }

    #[test]
    fn test_watch_skips_preprocessing() {
        assert_eq!(
            plan(Workflow::Test(TestTarget::Watch)),
            vec![Step::StartServer(ServerKind::Test), phase(MOCHA)]
        );
        assert_eq!(plan(Workflow::Test(TestTarget::Full)).len(), 5);
    }

    #[test]
    fn build_has_twelve_steps_with_one_parallel_group() {
        let steps = plan(Workflow::Build);
        assert_eq!(steps.len(), 12);
        assert_eq!(steps[2], parallel(&[COMPASS, COPY_STYLES, IMAGEMIN]));
        assert_eq!(steps.last(), Some(&phase(HTMLMIN)));
    }

    #[test]
    fn default_is_test_then_build() {
        let mut expected = plan(Workflow::Test(TestTarget::Full));
        expected.extend(plan(Workflow::Build));
        assert_eq!(plan(Workflow::Default), expected);
    }

    #[test]
    fn phase_names_flattens_groups() {
        let steps = plan(Workflow::Serve(ServeTarget::Live));
        let flat: Vec<&str> = phase_names(&steps).into_iter().map(PhaseName::as_str).collect();
        assert_eq!(flat, vec!["clean:server", "compass", "copy:styles", "autoprefixer"]);
    }
}
