//! User configuration at `~/.spindebug/config.yaml`.
//!
//! Every field carries a serde default, so a partial file (or no file at all)
//! yields a usable [`DebugConfig`].
//!
//! # API pattern
//!
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_DIR: &str = ".spindebug";
pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// The debug shim substituted as a component's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimSource {
    pub url: String,
    pub digest: String,
}

impl Default for ShimSource {
    fn default() -> Self {
        Self {
            url: "https://github.com/rajatjindal/wasm-console/raw/main/main.wasm".to_string(),
            digest: "sha256:ca1ab307ae38892efdc81379c93b1e29e6b1565ea706e874576d72b8f2598439"
                .to_string(),
        }
    }
}

/// Bounds for the post-swap readiness wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            timeout_secs: 60,
        }
    }
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry policy for writing the original image back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RestoreConfig {
    /// Delay before attempt `attempt + 1` (zero-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Effective spindebug configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Location of the app manifest inside the artifact.
    pub config_path: String,
    /// Repository prefix for published debug images; a timestamp is appended.
    pub debug_repository: String,
    /// Tag for published debug images (ttl.sh reads it as the expiry).
    pub debug_tag: String,
    /// Author recorded in the history entry of the appended layer.
    pub author: String,
    pub shim: ShimSource,
    pub readiness: ReadinessConfig,
    pub restore: RestoreConfig,
    /// Registries reached over plain HTTP in addition to localhost.
    pub insecure_registries: Vec<String>,
    /// `kubectl` binary used for workload access and attach.
    pub kubectl: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            config_path: "spin.toml".to_string(),
            debug_repository: "ttl.sh/spin-debug".to_string(),
            debug_tag: "24h".to_string(),
            author: "spindebug".to_string(),
            shim: ShimSource::default(),
            readiness: ReadinessConfig::default(),
            restore: RestoreConfig::default(),
            insecure_registries: vec![],
            kubectl: PathBuf::from("kubectl"),
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// `<home>/.spindebug/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// `<home>/.spindebug/`. Pure, no I/O.
pub fn state_dir_at(home: &Path) -> PathBuf {
    home.join(CONFIG_DIR)
}

/// Load the config rooted at `home`; a missing file yields defaults.
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<DebugConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(DebugConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(DebugConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<DebugConfig, ConfigError> {
    load_at(&home()?)
}

/// Render a config as YAML (used by `spindebug config`).
pub fn to_yaml(config: &DebugConfig) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(config)?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(home: &TempDir, yaml: &str) {
        let dir = home.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), yaml).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("tempdir");
        let cfg = load_at(home.path()).expect("load");
        assert_eq!(cfg, DebugConfig::default());
        assert_eq!(cfg.config_path, "spin.toml");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().expect("tempdir");
        write_config(
            &home,
            "debug_repository: registry.local:5000/debug\nreadiness:\n  timeout_secs: 120\n",
        );
        let cfg = load_at(home.path()).expect("load");
        assert_eq!(cfg.debug_repository, "registry.local:5000/debug");
        assert_eq!(cfg.readiness.timeout_secs, 120);
        assert_eq!(cfg.readiness.poll_interval_secs, 5);
        assert_eq!(cfg.restore, RestoreConfig::default());
    }

    #[test]
    fn partial_shim_keeps_default_digest() {
        let home = TempDir::new().expect("tempdir");
        write_config(&home, "shim:\n  url: https://mirror.local/console.wasm\n");
        let cfg = load_at(home.path()).expect("load");
        assert_eq!(cfg.shim.url, "https://mirror.local/console.wasm");
        assert_eq!(cfg.shim.digest, ShimSource::default().digest);
    }

    #[test]
    fn malformed_file_reports_path() {
        let home = TempDir::new().expect("tempdir");
        write_config(&home, "readiness: [not, a, map");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RestoreConfig::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(4), Duration::from_millis(8_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(8_000));
    }
}
