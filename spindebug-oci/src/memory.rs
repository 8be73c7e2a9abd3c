//! In-process [`ArtifactStore`], keyed by `registry/repository`.
//!
//! Used by tests and by anything that wants to stage an image without a
//! network round trip.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use spindebug_core::ArtifactRef;

use crate::digest::Digest;
use crate::error::OciError;
use crate::store::{ArtifactStore, RawManifest};

#[derive(Debug, Default)]
struct Repository {
    blobs: HashMap<Digest, Vec<u8>>,
    /// Keyed by tag and by digest.
    manifests: HashMap<String, RawManifest>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    repositories: Mutex<HashMap<String, Repository>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs held for the repository of `reference`.
    pub fn blob_count(&self, reference: &ArtifactRef) -> usize {
        let repos = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
        repos
            .get(&reference.name())
            .map(|repo| repo.blobs.len())
            .unwrap_or(0)
    }
}

impl ArtifactStore for MemoryStore {
    fn get_manifest(&self, reference: &ArtifactRef) -> Result<RawManifest, OciError> {
        let repos = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
        repos
            .get(&reference.name())
            .and_then(|repo| repo.manifests.get(reference.manifest_reference()))
            .cloned()
            .ok_or_else(|| OciError::ManifestNotFound(reference.clone()))
    }

    fn get_blob(&self, repository: &ArtifactRef, digest: &Digest) -> Result<Vec<u8>, OciError> {
        let repos = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
        repos
            .get(&repository.name())
            .and_then(|repo| repo.blobs.get(digest))
            .cloned()
            .ok_or_else(|| OciError::BlobNotFound {
                repository: repository.name(),
                digest: digest.clone(),
            })
    }

    fn blob_exists(&self, repository: &ArtifactRef, digest: &Digest) -> Result<bool, OciError> {
        let repos = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(repos
            .get(&repository.name())
            .is_some_and(|repo| repo.blobs.contains_key(digest)))
    }

    fn put_blob(
        &self,
        repository: &ArtifactRef,
        digest: &Digest,
        data: &[u8],
    ) -> Result<(), OciError> {
        digest.verify(data)?;
        let mut repos = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
        repos
            .entry(repository.name())
            .or_default()
            .blobs
            .insert(digest.clone(), data.to_vec());
        Ok(())
    }

    fn put_manifest(
        &self,
        reference: &ArtifactRef,
        manifest: &RawManifest,
    ) -> Result<Digest, OciError> {
        let digest = Digest::of(&manifest.body);
        let mut repos = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
        let repo = repos.entry(reference.name()).or_default();
        repo.manifests
            .insert(reference.manifest_reference().to_string(), manifest.clone());
        repo.manifests
            .insert(digest.as_str().to_string(), manifest.clone());
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs_are_scoped_to_repository() {
        let store = MemoryStore::new();
        let a = ArtifactRef::parse("registry.test/a:1").unwrap();
        let b = ArtifactRef::parse("registry.test/b:1").unwrap();
        let digest = Digest::of(b"blob");

        store.put_blob(&a, &digest, b"blob").unwrap();
        assert!(store.blob_exists(&a, &digest).unwrap());
        assert!(!store.blob_exists(&b, &digest).unwrap());
        assert!(matches!(
            store.get_blob(&b, &digest),
            Err(OciError::BlobNotFound { .. })
        ));
    }

    #[test]
    fn put_blob_rejects_wrong_digest() {
        let store = MemoryStore::new();
        let a = ArtifactRef::parse("registry.test/a:1").unwrap();
        let err = store.put_blob(&a, &Digest::of(b"x"), b"y").unwrap_err();
        assert!(matches!(err, OciError::DigestMismatch { .. }));
    }

    #[test]
    fn manifest_reachable_by_tag_and_digest() {
        let store = MemoryStore::new();
        let tagged = ArtifactRef::parse("registry.test/a:dev").unwrap();
        let raw = RawManifest {
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            body: b"{}".to_vec(),
        };
        let digest = store.put_manifest(&tagged, &raw).unwrap();
        assert_eq!(store.get_manifest(&tagged).unwrap(), raw);
        assert_eq!(
            store.get_manifest(&tagged.with_digest(digest.as_str())).unwrap(),
            raw
        );
    }
}
