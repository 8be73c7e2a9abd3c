//! Collaborator seams of a debug session.
//!
//! All three are blocking; the session drives them through
//! `tokio::task::spawn_blocking`.

use spindebug_core::{ArtifactRef, DebugConfig, Workload, WorkloadKey};
use spindebug_oci::{build_debug_image, ArtifactStore, BuildError, DebugImage};

use crate::error::ClusterError;

/// Read and write access to a workload's image.
pub trait WorkloadApi: Send + Sync + 'static {
    fn get(&self, key: &WorkloadKey) -> Result<Workload, ClusterError>;

    /// Persist `workload.image`; replica counts are read-only.
    fn update(&self, workload: &Workload) -> Result<(), ClusterError>;
}

/// Interactive stream to one running instance of a workload.
///
/// Blocks until the stream closes.
pub trait AttachSession: Send + Sync + 'static {
    fn attach(&self, key: &WorkloadKey, options: &AttachOptions) -> Result<(), ClusterError>;
}

/// Produces the debug image for an original image and component.
pub trait ImageBuilder: Send + Sync + 'static {
    fn build(&self, original: &ArtifactRef, component: &str) -> Result<DebugImage, BuildError>;
}

/// Per-call attach settings. The cluster connection belongs to the
/// [`AttachSession`] itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachOptions {
    pub stdin: bool,
    pub tty: bool,
    pub container: Option<String>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            stdin: true,
            tty: true,
            container: None,
        }
    }
}

/// [`ImageBuilder`] over any [`ArtifactStore`].
pub struct StoreImageBuilder<S> {
    store: S,
    config: DebugConfig,
}

impl<S> StoreImageBuilder<S> {
    pub fn new(store: S, config: DebugConfig) -> Self {
        Self { store, config }
    }
}

impl<S> ImageBuilder for StoreImageBuilder<S>
where
    S: ArtifactStore + Send + Sync + 'static,
{
    fn build(&self, original: &ArtifactRef, component: &str) -> Result<DebugImage, BuildError> {
        build_debug_image(&self.store, original, component, &self.config)
    }
}
