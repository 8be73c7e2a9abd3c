//! The content-addressed store seam.
//!
//! [`ArtifactStore`] is the raw distribution protocol: manifests by tag or
//! digest, blobs by digest. Resolution of indexes, digest verification, and
//! cross-repository copies are layered on top as free functions so every store
//! implementation shares them.

use spindebug_core::ArtifactRef;

use crate::digest::Digest;
use crate::error::OciError;
use crate::manifest::{
    is_index, ImageIndex, ImageManifest, ManifestProbe, DOCKER_MANIFEST, OCI_INDEX, OCI_MANIFEST,
};

/// A raw manifest body and the media type it was served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub media_type: String,
    pub body: Vec<u8>,
}

/// Pull/push operations against a registry-style store.
pub trait ArtifactStore {
    /// Manifest for a tag or digest reference.
    fn get_manifest(&self, reference: &ArtifactRef) -> Result<RawManifest, OciError>;

    /// Blob bytes from the repository of `repository`.
    fn get_blob(&self, repository: &ArtifactRef, digest: &Digest) -> Result<Vec<u8>, OciError>;

    fn blob_exists(&self, repository: &ArtifactRef, digest: &Digest) -> Result<bool, OciError>;

    fn put_blob(
        &self,
        repository: &ArtifactRef,
        digest: &Digest,
        data: &[u8],
    ) -> Result<(), OciError>;

    /// Publish a manifest under the tag (or digest) of `reference`.
    fn put_manifest(
        &self,
        reference: &ArtifactRef,
        manifest: &RawManifest,
    ) -> Result<Digest, OciError>;

    /// Link a blob from another repository without transferring it.
    ///
    /// Returns `false` when the store cannot mount; callers then copy bytes.
    fn mount_blob(
        &self,
        _from: &ArtifactRef,
        _to: &ArtifactRef,
        _digest: &Digest,
    ) -> Result<bool, OciError> {
        Ok(false)
    }
}

/// An image manifest pinned to the digest it was resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedManifest {
    /// The reference as requested.
    pub reference: ArtifactRef,
    pub digest: Digest,
    pub media_type: String,
    pub manifest: ImageManifest,
}

/// Resolve `reference` to a single-platform image manifest.
///
/// Indexes resolve to their `linux/amd64` entry, else the first entry.
pub fn resolve<S: ArtifactStore + ?Sized>(
    store: &S,
    reference: &ArtifactRef,
) -> Result<ResolvedManifest, OciError> {
    let raw = store.get_manifest(reference)?;
    if let Some(pinned) = reference.digest() {
        Digest::parse(pinned)?.verify(&raw.body)?;
    }
    let probe: ManifestProbe = serde_json::from_slice(&raw.body)?;
    let media_type = effective_media_type(&raw, &probe);

    if is_index(&media_type) {
        let index: ImageIndex = serde_json::from_slice(&raw.body)?;
        let entry = index.default_platform().ok_or_else(|| {
            OciError::ManifestUnsupported(format!("index {reference} lists no manifests"))
        })?;
        tracing::debug!(%reference, digest = %entry.digest, "resolved index entry");
        let pinned = reference.with_digest(entry.digest.as_str());
        let raw = store.get_manifest(&pinned)?;
        entry.digest.verify(&raw.body)?;
        let probe: ManifestProbe = serde_json::from_slice(&raw.body)?;
        let media_type = effective_media_type(&raw, &probe);
        if is_index(&media_type) {
            return Err(OciError::ManifestUnsupported(format!(
                "nested index at {pinned}"
            )));
        }
        return decode(reference, raw, media_type);
    }

    decode(reference, raw, media_type)
}

fn decode(
    reference: &ArtifactRef,
    raw: RawManifest,
    media_type: String,
) -> Result<ResolvedManifest, OciError> {
    if media_type != OCI_MANIFEST && media_type != DOCKER_MANIFEST {
        return Err(OciError::ManifestUnsupported(media_type));
    }
    let digest = Digest::of(&raw.body);
    let manifest: ImageManifest = serde_json::from_slice(&raw.body)?;
    Ok(ResolvedManifest {
        reference: reference.clone(),
        digest,
        media_type,
        manifest,
    })
}

/// Served content type wins; the document's own `mediaType` fills in for
/// stores that answer with a generic type.
fn effective_media_type(raw: &RawManifest, probe: &ManifestProbe) -> String {
    let served = raw.media_type.split(';').next().unwrap_or("").trim();
    if served.starts_with("application/vnd.") {
        return served.to_string();
    }
    match (&probe.media_type, &probe.manifests) {
        (Some(declared), _) => declared.clone(),
        (None, Some(_)) => OCI_INDEX.to_string(),
        (None, None) => OCI_MANIFEST.to_string(),
    }
}

/// Download a blob and check it against its digest.
pub fn get_verified_blob<S: ArtifactStore + ?Sized>(
    store: &S,
    repository: &ArtifactRef,
    digest: &Digest,
) -> Result<Vec<u8>, OciError> {
    let blob = store.get_blob(repository, digest)?;
    digest.verify(&blob)?;
    Ok(blob)
}

/// Make `digest` available in the repository of `to`, mounting when possible.
pub fn copy_blob<S: ArtifactStore + ?Sized>(
    store: &S,
    from: &ArtifactRef,
    to: &ArtifactRef,
    digest: &Digest,
) -> Result<(), OciError> {
    if from.same_repository(to) || store.blob_exists(to, digest)? {
        return Ok(());
    }
    if from.registry() == to.registry() && store.mount_blob(from, to, digest)? {
        tracing::debug!(%digest, from = %from.name(), to = %to.name(), "mounted blob");
        return Ok(());
    }
    let blob = get_verified_blob(store, from, digest)?;
    store.put_blob(to, digest, &blob)?;
    tracing::debug!(%digest, bytes = blob.len(), to = %to.name(), "copied blob");
    Ok(())
}
