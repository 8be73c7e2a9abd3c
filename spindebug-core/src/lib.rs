//! spindebug core library: artifact references, workload types, configuration.
//!
//! - [`reference`]: [`ArtifactRef`] parsing and rendering
//! - [`types`]: [`Workload`] and its key
//! - [`config`]: `~/.spindebug/config.yaml` loading
//! - [`error`]: [`ReferenceError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod reference;
pub mod types;

pub use config::{DebugConfig, ReadinessConfig, RestoreConfig, ShimSource};
pub use error::{ConfigError, ReferenceError};
pub use reference::ArtifactRef;
pub use types::{Workload, WorkloadKey};
