//! # spindebug-manifest
//!
//! Section-oriented rewriting of the Spin app manifest (`spin.toml`).
//!
//! Call [`rewrite`] to point one component at the debug shim and force its
//! trigger to `command`. The rewriter never parses TOML: sections are found by
//! header-line pattern so every untouched byte survives. [`app_name`] is the
//! one place a real TOML parser is used.

pub mod app;
pub mod diff;
pub mod error;
pub mod rewrite;

pub use app::{app_name, app_name_in_dir};
pub use diff::unified_diff;
pub use error::ManifestError;
pub use rewrite::{rewrite, rewrite_with, Rewritten, Section};
