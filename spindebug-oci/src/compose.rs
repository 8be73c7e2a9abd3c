//! Publish a base image plus one synthesized single-file layer.
//!
//! The base manifest and config are edited in place, so everything the
//! pipeline does not interpret (annotations, platform fields, entrypoints)
//! carries over to the new image unchanged.

use chrono::{DateTime, SecondsFormat, Utc};

use spindebug_core::{ArtifactRef, DebugConfig};

use crate::digest::Digest;
use crate::error::OciError;
use crate::layer::{single_file_tar, LayerBlob};
use crate::manifest::{
    Descriptor, History, ImageConfig, DOCKER_LAYER_GZIP, DOCKER_MANIFEST, OCI_LAYER_GZIP,
};
use crate::store::{copy_blob, get_verified_blob, resolve, ArtifactStore, RawManifest, ResolvedManifest};

/// The file to add and how to describe it in the image history.
#[derive(Debug, Clone, Copy)]
pub struct ComposeRequest<'a> {
    pub contents: &'a [u8],
    pub at_path: &'a str,
    pub author: &'a str,
    pub created_by: &'a str,
}

/// A published image.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedImage {
    /// Destination tag the manifest was pushed under.
    pub reference: ArtifactRef,
    pub digest: Digest,
    /// Descriptor of the added layer.
    pub layer: Descriptor,
}

impl ComposedImage {
    /// The destination pinned to the pushed manifest digest.
    pub fn pinned(&self) -> ArtifactRef {
        self.reference.with_digest(self.digest.as_str())
    }
}

/// Resolve `base` and publish it with `request` added under `destination`.
pub fn compose<S: ArtifactStore + ?Sized>(
    store: &S,
    base: &ArtifactRef,
    destination: &ArtifactRef,
    request: &ComposeRequest<'_>,
) -> Result<ComposedImage, OciError> {
    let resolved = resolve(store, base)?;
    compose_resolved(store, &resolved, destination, request, Utc::now())
}

/// As [`compose`], with a resolved base and an explicit history timestamp.
pub fn compose_resolved<S: ArtifactStore + ?Sized>(
    store: &S,
    base: &ResolvedManifest,
    destination: &ArtifactRef,
    request: &ComposeRequest<'_>,
    created: DateTime<Utc>,
) -> Result<ComposedImage, OciError> {
    let layer = LayerBlob::from_tar(&single_file_tar(request.at_path, request.contents)?)?;
    let layer_media_type = if base.media_type == DOCKER_MANIFEST {
        DOCKER_LAYER_GZIP
    } else {
        OCI_LAYER_GZIP
    };
    let layer_descriptor = Descriptor::new(
        layer_media_type,
        layer.digest.clone(),
        layer.compressed.len() as u64,
    );

    let config_bytes = get_verified_blob(store, &base.reference, &base.manifest.config.digest)?;
    let mut config: ImageConfig = serde_json::from_slice(&config_bytes)?;
    config.rootfs.diff_ids.push(layer.diff_id.clone());
    config.history.push(History {
        created: Some(created.to_rfc3339_opts(SecondsFormat::Secs, true)),
        author: Some(request.author.to_string()),
        created_by: Some(request.created_by.to_string()),
        ..History::default()
    });
    let config_bytes = serde_json::to_vec(&config)?;
    let config_digest = Digest::of(&config_bytes);

    let mut manifest = base.manifest.clone();
    manifest.config.digest = config_digest.clone();
    manifest.config.size = config_bytes.len() as u64;
    manifest.layers.push(layer_descriptor.clone());
    let manifest_bytes = serde_json::to_vec(&manifest)?;
    let expected = Digest::of(&manifest_bytes);

    for descriptor in &base.manifest.layers {
        copy_blob(store, &base.reference, destination, &descriptor.digest)?;
    }
    if !store.blob_exists(destination, &layer.digest)? {
        store.put_blob(destination, &layer.digest, &layer.compressed)?;
    }
    store.put_blob(destination, &config_digest, &config_bytes)?;

    let raw = RawManifest {
        media_type: base.media_type.clone(),
        body: manifest_bytes,
    };
    let digest = store.put_manifest(destination, &raw)?;
    if digest != expected {
        return Err(OciError::DigestMismatch {
            expected,
            actual: digest,
        });
    }

    tracing::info!(
        base = %base.reference,
        destination = %destination,
        %digest,
        layer = %layer.digest,
        "published image"
    );

    Ok(ComposedImage {
        reference: destination.clone(),
        digest,
        layer: layer_descriptor,
    })
}

/// `<debug_repository>-<unix millis>:<debug_tag>`.
pub fn debug_destination(
    config: &DebugConfig,
    now: DateTime<Utc>,
) -> Result<ArtifactRef, OciError> {
    let raw = format!(
        "{}-{}:{}",
        config.debug_repository,
        now.timestamp_millis(),
        config.debug_tag
    );
    Ok(ArtifactRef::parse(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_destination_is_ttl_sh() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let dest = debug_destination(&DebugConfig::default(), now).unwrap();
        assert_eq!(dest.registry(), "ttl.sh");
        assert_eq!(dest.repository(), "spin-debug-1700000000123");
        assert_eq!(dest.tag(), Some("24h"));
    }

    #[test]
    fn uppercase_repository_prefix_is_rejected() {
        let config = DebugConfig {
            debug_repository: "ttl.sh/Spin".to_string(),
            ..DebugConfig::default()
        };
        let err = debug_destination(&config, Utc::now()).unwrap_err();
        assert!(matches!(err, OciError::Reference(_)));
    }
}
