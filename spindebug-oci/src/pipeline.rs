//! Original image in, debug image out.
//!
//! ```text
//! resolve ─▶ fetch into TempDir ─▶ read config doc ─▶ rewrite ─▶ compose + push
//! ```

use std::fs;
use std::io;

use chrono::Utc;
use tempfile::TempDir;

use spindebug_core::{ArtifactRef, DebugConfig};

use crate::compose::{compose_resolved, debug_destination, ComposeRequest};
use crate::digest::Digest;
use crate::error::{io_err, BuildError};
use crate::fetch::fetch_resolved;
use crate::store::{resolve, ArtifactStore};

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugImage {
    pub original: ArtifactRef,
    /// Destination tag of the debug image.
    pub debug: ArtifactRef,
    pub digest: Digest,
    /// Whether the rewrite touched any section for the component.
    pub rewritten: bool,
}

/// Build and publish the debug variant of `original` for `component`.
///
/// The scratch directory is removed on every exit path.
pub fn build_debug_image<S: ArtifactStore + ?Sized>(
    store: &S,
    original: &ArtifactRef,
    component: &str,
    config: &DebugConfig,
) -> Result<DebugImage, BuildError> {
    let scratch = TempDir::new().map_err(|e| BuildError::Scratch {
        reference: original.clone(),
        source: io_err("<tempdir>", e),
    })?;

    let resolved = resolve(store, original).map_err(|source| BuildError::Resolve {
        reference: original.clone(),
        source,
    })?;
    fetch_resolved(store, &resolved, scratch.path()).map_err(|source| BuildError::Fetch {
        reference: original.clone(),
        source,
    })?;

    let config_rel = config.config_path.as_str();
    let doc_path = scratch.path().join(&config.config_path);
    let document = match fs::read_to_string(&doc_path) {
        Ok(document) => document,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(BuildError::ConfigNotFound {
                reference: original.clone(),
                path: config_rel.to_string(),
            });
        }
        Err(err) => {
            return Err(BuildError::Scratch {
                reference: original.clone(),
                source: io_err(&doc_path, err),
            })
        }
    };

    let rewritten = spindebug_manifest::rewrite_with(&document, component, &config.shim);
    if !rewritten.changed() {
        tracing::warn!(
            %component,
            path = %config_rel,
            "component not referenced by any trigger or component section"
        );
    }

    let now = Utc::now();
    let destination = debug_destination(config, now).map_err(|source| BuildError::Compose {
        reference: original.clone(),
        source,
    })?;
    let created_by = format!("add updated {config_rel}");
    let request = ComposeRequest {
        contents: rewritten.document.as_bytes(),
        at_path: config_rel,
        author: &config.author,
        created_by: &created_by,
    };
    let composed = compose_resolved(store, &resolved, &destination, &request, now).map_err(
        |source| BuildError::Compose {
            reference: original.clone(),
            source,
        },
    )?;

    tracing::info!(
        original = %original,
        debug = %composed.reference,
        digest = %composed.digest,
        "debug image ready"
    );

    Ok(DebugImage {
        original: original.clone(),
        debug: composed.reference,
        digest: composed.digest,
        rewritten: rewritten.changed(),
    })
}
