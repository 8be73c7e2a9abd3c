//! Error types for spindebug-oci.

use std::path::PathBuf;

use thiserror::Error;

use spindebug_core::{ArtifactRef, ReferenceError};

use crate::digest::Digest;

/// All errors that can arise from registry, layer, and compose operations.
#[derive(Debug, Error)]
pub enum OciError {
    #[error("invalid reference: {0}")]
    Reference(#[from] ReferenceError),

    /// Non-success HTTP status from the registry.
    #[error("registry returned {status} for {method} {url}: {body}")]
    Registry {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// Connection, TLS, or DNS failure.
    #[error("transport error talking to {url}: {message}")]
    Transport { url: String, message: String },

    #[error("authentication with {registry} failed: {message}")]
    Auth { registry: String, message: String },

    #[error("manifest not found: {0}")]
    ManifestNotFound(ArtifactRef),

    #[error("blob {digest} not found in {repository}")]
    BlobNotFound { repository: String, digest: Digest },

    #[error("unsupported manifest: {0}")]
    ManifestUnsupported(String),

    #[error("invalid digest '{0}'")]
    InvalidDigest(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("unsupported layer media type '{0}'")]
    UnsupportedLayer(String),

    /// Only directories and regular files may appear in a layer.
    #[error("unsupported tar entry kind {kind} at {path}")]
    UnsupportedEntryKind { path: String, kind: String },

    #[error("refusing to extract entry outside destination: {0}")]
    UnsafeEntryPath(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the debug image pipeline, tagged by stage.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to resolve {reference}: {source}")]
    Resolve {
        reference: ArtifactRef,
        #[source]
        source: OciError,
    },

    #[error("failed to fetch {reference}: {source}")]
    Fetch {
        reference: ArtifactRef,
        #[source]
        source: OciError,
    },

    #[error("no {path} at the root of {reference}")]
    ConfigNotFound { reference: ArtifactRef, path: String },

    #[error("failed to compose debug image from {reference}: {source}")]
    Compose {
        reference: ArtifactRef,
        #[source]
        source: OciError,
    },

    #[error("scratch directory error while building from {reference}: {source}")]
    Scratch {
        reference: ArtifactRef,
        #[source]
        source: OciError,
    },
}

/// Convenience constructor for [`OciError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> OciError {
    OciError::Io {
        path: path.into(),
        source,
    }
}
