//! Application metadata lookup.

use std::io::ErrorKind;
use std::path::Path;

use crate::error::ManifestError;

pub const MANIFEST_FILE: &str = "spin.toml";

/// `[application] name` of a manifest.
pub fn app_name(document: &str) -> Result<String, ManifestError> {
    let value: toml::Table = document.parse()?;
    value
        .get("application")
        .and_then(|app| app.get("name"))
        .and_then(toml::Value::as_str)
        .map(str::to_owned)
        .ok_or(ManifestError::MissingAppName)
}

/// App name from `<dir>/spin.toml`, or `None` when there is no manifest.
pub fn app_name_in_dir(dir: &Path) -> Result<Option<String>, ManifestError> {
    let path = dir.join(MANIFEST_FILE);
    match std::fs::read_to_string(&path) {
        Ok(document) => app_name(&document).map(Some),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ManifestError::Io { path, source }),
    }
}
