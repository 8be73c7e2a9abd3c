//! Error types for spindebug-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while parsing an artifact reference string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("artifact reference is empty")]
    Empty,

    #[error("invalid repository '{repository}' in reference '{input}'")]
    InvalidRepository { input: String, repository: String },

    #[error("invalid tag '{tag}' in reference '{input}'")]
    InvalidTag { input: String, tag: String },

    /// Only `sha256:<64 hex>` digests are accepted.
    #[error("invalid digest '{digest}' in reference '{input}'")]
    InvalidDigest { input: String, digest: String },
}

/// Errors raised while loading `~/.spindebug/config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
