//! Error types for spindebug-manifest.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from reading app metadata out of a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("manifest has no [application] name")]
    MissingAppName,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
