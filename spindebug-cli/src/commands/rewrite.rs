//! `spindebug rewrite <FILE> --component <C>` — preview the manifest rewrite.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use spindebug_core::DebugConfig;
use spindebug_manifest::{rewrite_with, unified_diff};

/// Arguments for `spindebug rewrite`.
#[derive(Args, Debug)]
pub struct RewriteArgs {
    /// Path to a spin.toml.
    pub file: PathBuf,

    /// Component to point at the debug shim.
    #[arg(long, short)]
    pub component: String,

    /// Print a unified diff instead of the rewritten manifest.
    #[arg(long, conflicts_with = "write")]
    pub diff: bool,

    /// Rewrite the file in place.
    #[arg(long)]
    pub write: bool,
}

impl RewriteArgs {
    pub fn run(self, config: &DebugConfig) -> Result<()> {
        let original = std::fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;

        let rewritten = rewrite_with(&original, &self.component, &config.shim);
        if !rewritten.changed() {
            eprintln!(
                "{} component '{}' not found in {}; nothing rewritten",
                "warning:".yellow().bold(),
                self.component,
                self.file.display()
            );
        }

        if self.write {
            if rewritten.changed() {
                std::fs::write(&self.file, &rewritten.document)
                    .with_context(|| format!("failed to write {}", self.file.display()))?;
            }
            println!(
                "{} {} ({} trigger, {} component)",
                "✓".green().bold(),
                self.file.display(),
                rewritten.triggers_rewritten,
                rewritten.components_rewritten
            );
        } else if self.diff {
            let label = self.file.display().to_string();
            print!("{}", unified_diff(&original, &rewritten.document, &label));
        } else {
            print!("{}", rewritten.document);
        }
        Ok(())
    }
}
