use std::fs;
use std::path::Path;

use spindebug_core::ArtifactRef;

use crate::digest::Digest;
use crate::error::{io_err, OciError};
use crate::layer::{self, ExtractStats};
use crate::store::{get_verified_blob, resolve, ArtifactStore, ResolvedManifest};

/// What a fetch wrote to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub reference: ArtifactRef,
    pub manifest_digest: Digest,
    pub layers: usize,
    pub files: usize,
    pub directories: usize,
    pub whiteouts: usize,
}

/// Resolve `reference` and unpack every layer, in order, into `dest`.
///
/// On error `dest` may hold the output of the layers applied so far.
pub fn fetch<S: ArtifactStore + ?Sized>(
    store: &S,
    reference: &ArtifactRef,
    dest: &Path,
) -> Result<FetchReport, OciError> {
    let resolved = resolve(store, reference)?;
    fetch_resolved(store, &resolved, dest)
}

/// Unpack an already-resolved manifest into `dest`.
pub fn fetch_resolved<S: ArtifactStore + ?Sized>(
    store: &S,
    resolved: &ResolvedManifest,
    dest: &Path,
) -> Result<FetchReport, OciError> {
    // Reject the whole artifact before touching disk.
    if let Some(bad) = resolved
        .manifest
        .layers
        .iter()
        .find(|l| !layer::is_tar_layer(&l.media_type))
    {
        return Err(OciError::UnsupportedLayer(bad.media_type.clone()));
    }

    fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;

    let mut totals = ExtractStats::default();
    for (index, descriptor) in resolved.manifest.layers.iter().enumerate() {
        let blob = get_verified_blob(store, &resolved.reference, &descriptor.digest)?;
        let stats = layer::extract(&blob, &descriptor.media_type, dest)?;
        tracing::debug!(
            layer = index,
            digest = %descriptor.digest,
            files = stats.files,
            directories = stats.directories,
            "extracted layer"
        );
        totals += stats;
    }

    tracing::info!(
        reference = %resolved.reference,
        digest = %resolved.digest,
        layers = resolved.manifest.layers.len(),
        files = totals.files,
        "fetched artifact"
    );

    Ok(FetchReport {
        reference: resolved.reference.clone(),
        manifest_digest: resolved.digest.clone(),
        layers: resolved.manifest.layers.len(),
        files: totals.files,
        directories: totals.directories,
        whiteouts: totals.whiteouts,
    })
}
