//! `kiln phases`: the registered phase set.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use kiln_build::standard_registry;

use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct PhasesArgs {
    /// Show inputs and outputs with `${name}` references resolved.
    #[arg(long)]
    pub resolved: bool,
}

#[derive(Serialize)]
struct PhaseJson {
    name: String,
    kind: String,
    inputs: Vec<String>,
    output: String,
}

#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "phase")]
    name: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "inputs")]
    inputs: String,
    #[tabled(rename = "output")]
    output: String,
}

impl PhasesArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let project_dir = super::project_dir(global)?;
        let manifest = super::load_manifest(global, &project_dir)?;
        let registry = standard_registry(&manifest).context("failed to register phases")?;
        let config = manifest
            .context(&project_dir)
            .context("failed to resolve paths")?;

        let mut phases = Vec::with_capacity(registry.len());
        for phase in registry.phases() {
            let (inputs, output) = if self.resolved {
                let invocation = phase
                    .invocation(&config)
                    .with_context(|| format!("cannot resolve phase '{}'", phase.name()))?;
                (invocation.inputs, invocation.output)
            } else {
                (phase.inputs().to_vec(), phase.output().to_string())
            };
            phases.push(PhaseJson {
                name: phase.name().to_string(),
                kind: phase.kind(),
                inputs,
                output,
            });
        }

        if global.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&phases).context("failed to serialize phases JSON")?
            );
            return Ok(());
        }

        let rows: Vec<PhaseRow> = phases
            .into_iter()
            .map(|p| PhaseRow {
                name: p.name,
                kind: p.kind,
                inputs: p.inputs.join("\n"),
                output: p.output,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
