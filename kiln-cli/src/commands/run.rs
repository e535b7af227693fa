//! `kiln`, `kiln serve [dist]`, `kiln test [watch]`, `kiln build`.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use kiln_build::{OutcomeStatus, RunReport};
use kiln_core::Workflow;
use kiln_runtime::run_blocking;

use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// `dist` serves the built site without watching.
    #[arg(value_parser = ["dist"])]
    pub target: Option<String>,
}

impl ServeArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let workflow =
            Workflow::from_parts("serve", self.target.as_deref()).map_err(anyhow::Error::msg)?;
        run(global, workflow)
    }
}

#[derive(Args, Debug)]
pub struct TestArgs {
    /// `watch` reuses the staged styles and skips re-staging.
    #[arg(value_parser = ["watch"])]
    pub target: Option<String>,
}

impl TestArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let workflow =
            Workflow::from_parts("test", self.target.as_deref()).map_err(anyhow::Error::msg)?;
        run(global, workflow)
    }
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "phase")]
    phase: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "time")]
    time: String,
}

/// Run `workflow` and print its report. Fails when the workflow failed.
pub fn run(global: &GlobalArgs, workflow: Workflow) -> Result<()> {
    let project_dir = super::project_dir(global)?;
    let manifest = super::load_manifest(global, &project_dir)?;
    let report = run_blocking(&manifest, &project_dir, workflow)
        .with_context(|| format!("failed to start workflow '{workflow}'"))?;

    if global.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize run report")?
        );
    } else {
        print_report(&report);
    }

    if !report.succeeded() {
        bail!(
            "workflow '{workflow}' failed: {}",
            report.failure.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    if !report.phases.is_empty() {
        let rows: Vec<OutcomeRow> = report
            .phases
            .iter()
            .map(|outcome| OutcomeRow {
                phase: outcome.name.to_string(),
                status: status_label(outcome.status),
                time: format!("{} ms", outcome.duration_ms),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if report.succeeded() {
        println!(
            "{} {} in {} ms",
            "✓".green(),
            report.workflow,
            report.duration_ms
        );
    } else {
        println!("{} {} failed", "✗".red(), report.workflow);
    }
}

fn status_label(status: OutcomeStatus) -> String {
    match status {
        OutcomeStatus::Succeeded => "ok".green().to_string(),
        OutcomeStatus::Failed => "FAILED".red().bold().to_string(),
        OutcomeStatus::Cancelled => "cancelled".yellow().to_string(),
    }
}
