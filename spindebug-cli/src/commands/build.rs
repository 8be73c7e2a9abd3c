//! `spindebug build <IMAGE> --component <C>` — publish a debug image only.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use spindebug_core::{ArtifactRef, DebugConfig};
use spindebug_oci::{build_debug_image, RemoteStore};

/// Arguments for `spindebug build`.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Image reference of the app to debug.
    pub image: String,

    /// Component whose source is replaced with the debug shim.
    #[arg(long, short)]
    pub component: String,
}

impl BuildArgs {
    pub fn run(self, config: &DebugConfig) -> Result<()> {
        let original = ArtifactRef::parse(&self.image)
            .with_context(|| format!("invalid image reference '{}'", self.image))?;
        let store = RemoteStore::from_config(config).context("failed to load registry credentials")?;

        let image = build_debug_image(&store, &original, &self.component, config)
            .with_context(|| format!("failed to build debug image from {original}"))?;

        if !image.rewritten {
            eprintln!(
                "{} component '{}' not found in {}; image published unchanged",
                "warning:".yellow().bold(),
                self.component,
                config.config_path
            );
        }
        println!("{}", image.debug);
        println!("{}", image.digest.to_string().bright_black());
        Ok(())
    }
}
