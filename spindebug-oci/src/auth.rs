//! Registry credentials and `WWW-Authenticate` challenges.
//!
//! Credentials come from the Docker CLI config (`$DOCKER_CONFIG/config.json`
//! or `~/.docker/config.json`). Only inline `auths` entries are read;
//! credential helpers are not invoked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::Deserialize;

use spindebug_core::reference::DEFAULT_REGISTRY;

use crate::error::{io_err, OciError};

/// Key Docker uses for Hub credentials.
const DOCKER_HUB_CONFIG_KEY: &str = "https://index.docker.io/v1/";

/// Credentials for one registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Credential {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
    /// OAuth2 refresh token stored by `docker login` for some registries.
    IdentityToken(String),
}

impl Credential {
    /// `Authorization` header value for direct Basic auth, if any.
    pub fn basic_header(&self) -> Option<String> {
        match self {
            Credential::Basic { username, password } => Some(format!(
                "Basic {}",
                BASE64_STANDARD.encode(format!("{username}:{password}"))
            )),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Docker config
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    identitytoken: Option<String>,
}

impl DockerAuthEntry {
    fn credential(&self) -> Option<Credential> {
        if let Some(token) = self.identitytoken.as_ref().filter(|t| !t.is_empty()) {
            return Some(Credential::IdentityToken(token.clone()));
        }
        if let Some(encoded) = self.auth.as_ref().filter(|a| !a.is_empty()) {
            let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':')?;
            return Some(Credential::Basic {
                username: username.to_string(),
                password: password.to_string(),
            });
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credential::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Credentials indexed by normalised registry host.
#[derive(Debug, Clone, Default)]
pub struct Keychain {
    entries: HashMap<String, Credential>,
}

impl Keychain {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Load the Docker CLI config; a missing file yields an anonymous keychain.
    pub fn from_docker_config() -> Result<Self, OciError> {
        match docker_config_path() {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::anonymous()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, OciError> {
        if !path.exists() {
            return Ok(Self::anonymous());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let keychain = Self::from_json(&raw)?;
        tracing::debug!(path = %path.display(), registries = keychain.entries.len(), "loaded registry credentials");
        Ok(keychain)
    }

    pub fn from_json(raw: &str) -> Result<Self, OciError> {
        let file: DockerConfigFile = serde_json::from_str(raw)?;
        if file.creds_store.is_some() || !file.cred_helpers.is_empty() {
            tracing::debug!("docker credential helpers are configured but not used");
        }
        let entries = file
            .auths
            .iter()
            .filter_map(|(key, entry)| Some((normalize_registry(key), entry.credential()?)))
            .collect();
        Ok(Self { entries })
    }

    pub fn insert(&mut self, registry: &str, credential: Credential) {
        self.entries.insert(normalize_registry(registry), credential);
    }

    /// Credential for `registry`, anonymous when none is configured.
    pub fn resolve(&self, registry: &str) -> Credential {
        self.entries
            .get(&normalize_registry(registry))
            .cloned()
            .unwrap_or_default()
    }
}

fn docker_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }
    dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
}

/// Strip scheme and path from a config key and fold Docker Hub aliases.
fn normalize_registry(key: &str) -> String {
    if key == DOCKER_HUB_CONFIG_KEY {
        return DEFAULT_REGISTRY.to_string();
    }
    let host = key
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    match host {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => DEFAULT_REGISTRY.to_string(),
        other => other.to_ascii_lowercase(),
    }
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

/// A parsed `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

/// Parse `Bearer realm="…",service="…",scope="…"` or `Basic realm="…"`.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let params = parse_params(rest);
    Some(Challenge::Bearer {
        realm: params.get("realm")?.clone(),
        service: params.get("service").cloned(),
        scope: params.get("scope").cloned(),
    })
}

/// `key="value"` pairs separated by commas; commas inside quotes belong to the value.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
        }
        params.insert(key.trim().to_ascii_lowercase(), value);
    }
    params
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token(self) -> Option<String> {
        self.token
            .filter(|t| !t.is_empty())
            .or(self.access_token.filter(|t| !t.is_empty()))
    }
}
