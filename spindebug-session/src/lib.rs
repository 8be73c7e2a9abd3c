//! # spindebug-session
//!
//! Swaps a live workload onto a debug image, waits for it to come up,
//! attaches, and restores the original image on every exit path.
//!
//! The control plane, attach transport, and image build are reached through
//! the [`WorkloadApi`], [`AttachSession`], and [`ImageBuilder`] traits;
//! [`Kubectl`] implements the first two against `SpinApp` resources.

pub mod error;
pub mod guard;
pub mod kubectl;
pub mod lock;
pub mod readiness;
pub mod session;
mod task;
pub mod workload;

pub use error::{ClusterError, SessionError, Stage};
pub use guard::{RestoreOutcome, SwapGuard};
pub use kubectl::Kubectl;
pub use lock::SessionLock;
pub use readiness::{wait_ready, Readiness};
pub use session::{DebugSession, SessionReport, SessionRequest, SessionState};
pub use workload::{AttachOptions, AttachSession, ImageBuilder, StoreImageBuilder, WorkloadApi};
