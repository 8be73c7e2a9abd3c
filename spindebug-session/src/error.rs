use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use spindebug_core::{ArtifactRef, WorkloadKey};
use spindebug_oci::{BuildError, OciError};

use crate::session::SessionState;

/// Failures talking to the control plane or the attach transport.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("workload {0} not found")]
    NotFound(WorkloadKey),

    /// A `kubectl` invocation exited unsuccessfully.
    #[error("{program} {args} failed (status {status}): {stderr}")]
    Command {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected workload document for {workload}: {message}")]
    Malformed { workload: WorkloadKey, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The session stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lock,
    Build,
    Swap,
    Readiness,
    Attach,
    Restore,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Lock => "lock",
            Stage::Build => "build",
            Stage::Swap => "swap",
            Stage::Readiness => "readiness",
            Stage::Attach => "attach",
            Stage::Restore => "restore",
        })
    }
}

/// Terminal errors of a debug session.
///
/// Every message names the failing stage and whether the workload may still
/// be running the debug image.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("build: cannot resolve {reference} (workload untouched): {source}")]
    ReferenceResolution {
        reference: String,
        #[source]
        source: OciError,
    },

    #[error("build: cannot fetch {reference} (workload untouched): {source}")]
    ArtifactFetch {
        reference: ArtifactRef,
        #[source]
        source: OciError,
    },

    #[error("build: no {path} in {reference} (workload untouched)")]
    ConfigNotFound { reference: ArtifactRef, path: String },

    #[error("build: cannot publish debug image of {reference} (workload untouched): {source}")]
    Compose {
        reference: ArtifactRef,
        #[source]
        source: OciError,
    },

    #[error("build: cannot read workload {workload} (workload untouched): {source}")]
    WorkloadRead {
        workload: WorkloadKey,
        #[source]
        source: ClusterError,
    },

    #[error("swap: setting {workload} to {image} failed (workload may be swapped): {source}")]
    WorkloadUpdate {
        workload: WorkloadKey,
        image: String,
        #[source]
        source: ClusterError,
    },

    /// Raised only after the original image was written back; a failed
    /// restore surfaces as [`SessionError::RestoreFailed`] instead.
    #[error("readiness: {workload} not ready within {timeout:?} (original image restored)")]
    ReadinessTimeout {
        workload: WorkloadKey,
        timeout: Duration,
    },

    #[error(
        "restore: {workload} is STILL RUNNING {debug}; set it back to {original} manually \
         ({attempts} attempts): {source}"
    )]
    RestoreFailed {
        workload: WorkloadKey,
        debug: String,
        original: String,
        attempts: u32,
        #[source]
        source: ClusterError,
    },

    /// Stopped by the caller before the attach step; a swapped workload was
    /// restored first, and a failed restore surfaces as
    /// [`SessionError::RestoreFailed`] instead.
    #[error("interrupted: {workload} session stopped while {state} ({})", swap_note(.restored))]
    Interrupted {
        workload: WorkloadKey,
        state: SessionState,
        restored: bool,
    },

    #[error(
        "lock: another local session (pid {pid}) holds {workload}; \
         if it is gone, remove {path}"
    )]
    SessionLocked {
        workload: WorkloadKey,
        path: PathBuf,
        pid: String,
    },

    #[error("lock: I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking collaborator call panicked or was cancelled.
    #[error("{stage}: background task failed: {message}")]
    Task { stage: Stage, message: String },
}

impl SessionError {
    pub fn stage(&self) -> Stage {
        match self {
            SessionError::ReferenceResolution { .. }
            | SessionError::ArtifactFetch { .. }
            | SessionError::ConfigNotFound { .. }
            | SessionError::Compose { .. }
            | SessionError::WorkloadRead { .. } => Stage::Build,
            SessionError::WorkloadUpdate { .. } => Stage::Swap,
            SessionError::ReadinessTimeout { .. } => Stage::Readiness,
            SessionError::Interrupted { state, .. } => match state {
                SessionState::Idle | SessionState::ArtifactBuilt => Stage::Build,
                _ => Stage::Readiness,
            },
            SessionError::RestoreFailed { .. } => Stage::Restore,
            SessionError::SessionLocked { .. } | SessionError::Io { .. } => Stage::Lock,
            SessionError::Task { stage, .. } => *stage,
        }
    }

    /// Whether the workload may have been left on the debug image.
    pub fn workload_swapped(&self) -> bool {
        match self {
            SessionError::WorkloadUpdate { .. } | SessionError::RestoreFailed { .. } => true,
            SessionError::Task { stage, .. } => {
                matches!(
                    stage,
                    Stage::Swap | Stage::Readiness | Stage::Attach | Stage::Restore
                )
            }
            _ => false,
        }
    }
}

fn swap_note(restored: &bool) -> &'static str {
    if *restored {
        "original image restored"
    } else {
        "workload untouched"
    }
}

impl From<BuildError> for SessionError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Resolve { reference, source } => SessionError::ReferenceResolution {
                reference: reference.to_string(),
                source,
            },
            BuildError::Fetch { reference, source } => {
                SessionError::ArtifactFetch { reference, source }
            }
            BuildError::ConfigNotFound { reference, path } => {
                SessionError::ConfigNotFound { reference, path }
            }
            BuildError::Compose { reference, source } => {
                SessionError::Compose { reference, source }
            }
            BuildError::Scratch { reference, source } => {
                SessionError::ArtifactFetch { reference, source }
            }
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ClusterError {
    ClusterError::Io {
        path: path.into(),
        source,
    }
}
