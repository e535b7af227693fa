//! `kiln init`

use anyhow::{Context, Result};
use clap::Args;

use kiln_core::manifest::init_at;

use crate::GlobalArgs;

/// Write a default kiln.yaml into the project directory.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let project_dir = super::project_dir(global)?;
        let path = init_at(&project_dir)
            .with_context(|| format!("failed to init '{}'", project_dir.display()))?;
        println!("✓ Wrote {}", path.display());
        println!("  Edit `paths`, `server` and `tools` to fit the project.");
        Ok(())
    }
}
