//! kiln: front-end build pipeline coordinator.
//!
//! # Usage
//!
//! ```text
//! kiln [default]                 test, then build
//! kiln serve [dist]              live server + watcher, or the built site
//! kiln test [watch]              stage and run the browser tests
//! kiln build                     produce the distribution tree
//! kiln plan <workflow> [target]  print the steps a workflow runs
//! kiln phases                    list the registered phases
//! kiln init                      write a default kiln.yaml
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

use commands::{
    init::InitArgs, phases::PhasesArgs, plan::PlanArgs, run::ServeArgs, run::TestArgs,
};
use kiln_core::Workflow;
use kiln_runtime::{init_tracing, LogFormat};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    version,
    about = "Stage, test, bundle and serve a static front-end project",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Project root.
    #[arg(long, global = true, default_value = ".")]
    pub project_dir: PathBuf,

    /// Manifest path; defaults to `<project-dir>/kiln.yaml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the tests, then build (the same as no subcommand).
    Default,

    /// Serve the project with live-reload, or the built site with `dist`.
    Serve(ServeArgs),

    /// Stage styles and run the browser tests.
    Test(TestArgs),

    /// Build the distribution tree.
    Build,

    /// Print the steps a workflow would run, without running them.
    Plan(PlanArgs),

    /// List the registered phases with their inputs and outputs.
    Phases(PhasesArgs),

    /// Write a default kiln.yaml into the project directory.
    Init(InitArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose, cli.global.log_format.into());

    let global = cli.global;
    match cli.command.unwrap_or(Commands::Default) {
        Commands::Default => commands::run::run(&global, Workflow::Default),
        Commands::Serve(args) => args.run(&global),
        Commands::Test(args) => args.run(&global),
        Commands::Build => commands::run::run(&global, Workflow::Build),
        Commands::Plan(args) => args.run(&global),
        Commands::Phases(args) => args.run(&global),
        Commands::Init(args) => args.run(&global),
    }
}
