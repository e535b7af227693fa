//! `kiln plan <workflow> [target]`: the steps a workflow runs.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use kiln_build::{plan, standard_registry, validate, Step};
use kiln_core::Workflow;

use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// serve | test | build | default
    pub workflow: String,

    /// `dist` for serve, `watch` for test.
    pub target: Option<String>,
}

#[derive(Serialize)]
struct PlanJson<'a> {
    workflow: String,
    steps: &'a [Step],
}

impl PlanArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let workflow = Workflow::from_parts(&self.workflow, self.target.as_deref())
            .map_err(anyhow::Error::msg)?;
        let steps = plan(workflow);

        let project_dir = super::project_dir(global)?;
        let manifest = super::load_manifest(global, &project_dir)?;
        let registry = standard_registry(&manifest).context("failed to register phases")?;
        let config = manifest
            .context(&project_dir)
            .context("failed to resolve paths")?;
        validate(&steps, &registry, &config)
            .with_context(|| format!("workflow '{workflow}' cannot run"))?;

        if global.json {
            let payload = PlanJson {
                workflow: workflow.to_string(),
                steps: &steps,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }

        println!("{}", workflow.to_string().bold());
        for (index, step) in steps.iter().enumerate() {
            println!("{:>3}. {}", index + 1, describe(step));
        }
        Ok(())
    }
}

fn describe(step: &Step) -> String {
    match step {
        Step::Phase(_) | Step::Parallel(_) => step.to_string(),
        Step::StartServer(_) | Step::KeepAlive | Step::Watch => step.to_string().cyan().to_string(),
    }
}
