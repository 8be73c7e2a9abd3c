//! `spindebug pull <IMAGE> <DIR>` — unpack an image into a directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use spindebug_core::{ArtifactRef, DebugConfig};
use spindebug_oci::{fetch, RemoteStore};

/// Arguments for `spindebug pull`.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image reference, e.g. `ghcr.io/acme/hello:v1`.
    pub image: String,

    /// Destination directory (created if missing).
    pub dir: PathBuf,
}

impl PullArgs {
    pub fn run(self, config: &DebugConfig) -> Result<()> {
        let reference = ArtifactRef::parse(&self.image)
            .with_context(|| format!("invalid image reference '{}'", self.image))?;
        let store = RemoteStore::from_config(config).context("failed to load registry credentials")?;

        let report = fetch(&store, &reference, &self.dir)
            .with_context(|| format!("failed to pull {reference}"))?;

        println!(
            "✓ {} ({}) → {}: {} layers, {} files, {} directories",
            report.reference,
            report.manifest_digest,
            self.dir.display(),
            report.layers,
            report.files,
            report.directories
        );
        Ok(())
    }
}
