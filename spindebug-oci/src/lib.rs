//! # spindebug-oci
//!
//! Registry access, layer extraction, and debug image publishing.
//!
//! ## Layout
//!
//! | Module | Purpose |
//! |---|---|
//! | [`store`] | [`ArtifactStore`] seam, manifest resolution, blob copies |
//! | [`remote`] | OCI distribution API client ([`RemoteStore`]) |
//! | [`memory`] | In-process store ([`MemoryStore`]) |
//! | [`auth`] | Docker config credentials, `WWW-Authenticate` parsing |
//! | [`fetch`] | Unpack an artifact onto a directory |
//! | [`compose`] | Publish a base image plus one single-file layer |
//! | [`pipeline`] | [`build_debug_image`]: fetch, rewrite, compose |

pub mod auth;
pub mod compose;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod layer;
pub mod manifest;
pub mod memory;
pub mod pipeline;
pub mod remote;
pub mod store;

pub use compose::{compose, compose_resolved, debug_destination, ComposeRequest, ComposedImage};
pub use digest::Digest;
pub use error::{BuildError, OciError};
pub use fetch::{fetch, fetch_resolved, FetchReport};
pub use memory::MemoryStore;
pub use pipeline::{build_debug_image, DebugImage};
pub use remote::RemoteStore;
pub use store::{copy_blob, resolve, ArtifactStore, RawManifest, ResolvedManifest};
