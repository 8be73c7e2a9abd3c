//! `spindebug config` — print the effective configuration.

use anyhow::{Context, Result};
use clap::Args;

use spindebug_core::config::{config_path_at, to_yaml};
use spindebug_core::DebugConfig;

/// Arguments for `spindebug config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {}

impl ConfigArgs {
    pub fn run(self, config: &DebugConfig) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let path = config_path_at(&home);
        let origin = if path.exists() { "" } else { " (not found; defaults)" };
        println!("# {}{origin}", path.display());
        print!("{}", to_yaml(config).context("failed to render config")?);
        Ok(())
    }
}
