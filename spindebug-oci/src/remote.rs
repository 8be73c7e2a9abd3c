//! [`ArtifactStore`] over the OCI distribution HTTP API.
//!
//! Requests go out anonymously (or with a cached token) first; a `401`
//! carries a `WWW-Authenticate` challenge which is answered once, the
//! resulting header cached per registry and scope set, and the request
//! replayed.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use spindebug_core::reference::DEFAULT_REGISTRY;
use spindebug_core::{ArtifactRef, DebugConfig};

use crate::auth::{parse_challenge, Challenge, Credential, Keychain, TokenResponse};
use crate::digest::Digest;
use crate::error::OciError;
use crate::manifest::ACCEPTED_MANIFESTS;
use crate::store::{ArtifactStore, RawManifest};

const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
const MAX_MANIFEST_BYTES: u64 = 4 * 1024 * 1024;
const MAX_ERROR_BODY: usize = 512;
const CLIENT_ID: &str = "spindebug";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Pull,
    Push,
}

pub struct RemoteStore {
    agent: ureq::Agent,
    keychain: Keychain,
    insecure: Vec<String>,
    /// `Authorization` header values keyed by `registry|scopes`.
    tokens: Mutex<HashMap<String, String>>,
}

impl RemoteStore {
    pub fn new(keychain: Keychain, insecure_registries: Vec<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(15))
            .timeout_read(Duration::from_secs(300))
            .user_agent(concat!("spindebug/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            keychain,
            insecure: insecure_registries,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Store using ambient Docker credentials and the configured insecure hosts.
    pub fn from_config(config: &DebugConfig) -> Result<Self, OciError> {
        Ok(Self::new(
            Keychain::from_docker_config()?,
            config.insecure_registries.clone(),
        ))
    }

    fn scheme(&self, registry: &str) -> &'static str {
        let host = registry.split(':').next().unwrap_or(registry);
        if host == "localhost" || host == "127.0.0.1" || self.insecure.iter().any(|r| r == registry)
        {
            "http"
        } else {
            "https"
        }
    }

    fn origin(&self, registry: &str) -> String {
        let host = if registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            registry
        };
        format!("{}://{host}", self.scheme(registry))
    }

    fn repo_url(&self, reference: &ArtifactRef) -> String {
        format!(
            "{}/v2/{}",
            self.origin(reference.registry()),
            reference.repository()
        )
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    fn call(
        &self,
        method: &'static str,
        url: &str,
        registry: &str,
        scopes: &[String],
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<ureq::Response, OciError> {
        let cache_key = format!("{registry}|{}", scopes.join(" "));
        let cached = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
            .cloned();

        match self.send(method, url, headers, body, cached.as_deref()) {
            Err(ureq::Error::Status(401, response)) => {
                let challenge = response
                    .header("WWW-Authenticate")
                    .and_then(parse_challenge)
                    .ok_or_else(|| OciError::Auth {
                        registry: registry.to_string(),
                        message: format!("401 from {url} without a usable challenge"),
                    })?;
                let authorization = self.authorize(registry, scopes, &challenge)?;
                self.tokens
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(cache_key, authorization.clone());
                self.send(method, url, headers, body, Some(&authorization))
                    .map_err(|e| map_error(method, url, e))
            }
            other => other.map_err(|e| map_error(method, url, e)),
        }
    }

    fn send(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        authorization: Option<&str>,
    ) -> Result<ureq::Response, ureq::Error> {
        let mut request = self.agent.request(method, url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        if let Some(authorization) = authorization {
            request = request.set("Authorization", authorization);
        }
        match body {
            Some(bytes) => request.send_bytes(bytes),
            None => request.call(),
        }
    }

    /// Answer a challenge with an `Authorization` header value.
    fn authorize(
        &self,
        registry: &str,
        scopes: &[String],
        challenge: &Challenge,
    ) -> Result<String, OciError> {
        let credential = self.keychain.resolve(registry);
        match challenge {
            Challenge::Basic => credential.basic_header().ok_or_else(|| OciError::Auth {
                registry: registry.to_string(),
                message: "registry requires basic auth but no credentials are configured"
                    .to_string(),
            }),
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let mut scopes = scopes.to_vec();
                if let Some(scope) = scope {
                    if !scopes.contains(scope) {
                        scopes.push(scope.clone());
                    }
                }
                let token =
                    self.fetch_token(registry, realm, service.as_deref(), &scopes, &credential)?;
                tracing::debug!(%registry, scopes = %scopes.join(" "), "obtained bearer token");
                Ok(format!("Bearer {token}"))
            }
        }
    }

    fn fetch_token(
        &self,
        registry: &str,
        realm: &str,
        service: Option<&str>,
        scopes: &[String],
        credential: &Credential,
    ) -> Result<String, OciError> {
        let auth_err = |message: String| OciError::Auth {
            registry: registry.to_string(),
            message,
        };

        let (method, result) = match credential {
            Credential::IdentityToken(refresh) => {
                let scope = scopes.join(" ");
                let mut form = vec![
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh.as_str()),
                    ("client_id", CLIENT_ID),
                    ("scope", scope.as_str()),
                ];
                if let Some(service) = service {
                    form.push(("service", service));
                }
                ("POST", self.agent.post(realm).send_form(&form))
            }
            _ => {
                let mut request = self.agent.get(realm);
                if let Some(service) = service {
                    request = request.query("service", service);
                }
                for scope in scopes {
                    request = request.query("scope", scope);
                }
                if let Some(basic) = credential.basic_header() {
                    request = request.set("Authorization", &basic);
                }
                ("GET", request.call())
            }
        };

        let response = result.map_err(|e| auth_err(map_error(method, realm, e).to_string()))?;
        let body: TokenResponse = response
            .into_json()
            .map_err(|e| auth_err(format!("unreadable token response: {e}")))?;
        body.into_token()
            .ok_or_else(|| auth_err("token response carried no token".to_string()))
    }

    fn scopes(&self, reference: &ArtifactRef, access: Access) -> Vec<String> {
        let actions = match access {
            Access::Pull => "pull",
            Access::Push => "pull,push",
        };
        vec![format!("repository:{}:{actions}", reference.repository())]
    }

    /// Upload `data` with the two-step POST + PUT flow.
    fn upload(&self, repository: &ArtifactRef, digest: &Digest, data: &[u8]) -> Result<(), OciError> {
        let registry = repository.registry();
        let scopes = self.scopes(repository, Access::Push);
        let start_url = format!("{}/blobs/uploads/", self.repo_url(repository));
        let started = self.call(
            "POST",
            &start_url,
            registry,
            &scopes,
            &[("Content-Length", "0")],
            Some(&[][..]),
        )?;
        let location = started.header("Location").ok_or_else(|| OciError::Registry {
            method: "POST",
            url: start_url.clone(),
            status: started.status(),
            body: "upload session has no Location header".to_string(),
        })?;

        let mut put_url = if location.starts_with('/') {
            format!("{}{location}", self.origin(registry))
        } else {
            location.to_string()
        };
        put_url.push(if put_url.contains('?') { '&' } else { '?' });
        put_url.push_str("digest=");
        put_url.push_str(digest.as_str());

        self.call(
            "PUT",
            &put_url,
            registry,
            &scopes,
            &[("Content-Type", "application/octet-stream")],
            Some(data),
        )?;
        Ok(())
    }
}

impl ArtifactStore for RemoteStore {
    fn get_manifest(&self, reference: &ArtifactRef) -> Result<RawManifest, OciError> {
        let url = format!(
            "{}/manifests/{}",
            self.repo_url(reference),
            reference.manifest_reference()
        );
        let accept = ACCEPTED_MANIFESTS.join(", ");
        let response = match self.call(
            "GET",
            &url,
            reference.registry(),
            &self.scopes(reference, Access::Pull),
            &[("Accept", accept.as_str())],
            None,
        ) {
            Err(OciError::Registry { status: 404, .. }) => {
                return Err(OciError::ManifestNotFound(reference.clone()))
            }
            other => other?,
        };

        let media_type = response.header("Content-Type").unwrap_or_default().to_string();
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_MANIFEST_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| transport(&url, e))?;
        tracing::debug!(%reference, %media_type, bytes = body.len(), "fetched manifest");
        Ok(RawManifest { media_type, body })
    }

    fn get_blob(&self, repository: &ArtifactRef, digest: &Digest) -> Result<Vec<u8>, OciError> {
        let url = format!("{}/blobs/{digest}", self.repo_url(repository));
        let response = match self.call(
            "GET",
            &url,
            repository.registry(),
            &self.scopes(repository, Access::Pull),
            &[],
            None,
        ) {
            Err(OciError::Registry { status: 404, .. }) => {
                return Err(OciError::BlobNotFound {
                    repository: repository.name(),
                    digest: digest.clone(),
                })
            }
            other => other?,
        };

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| transport(&url, e))?;
        tracing::debug!(%digest, bytes = body.len(), "fetched blob");
        Ok(body)
    }

    fn blob_exists(&self, repository: &ArtifactRef, digest: &Digest) -> Result<bool, OciError> {
        let url = format!("{}/blobs/{digest}", self.repo_url(repository));
        match self.call(
            "HEAD",
            &url,
            repository.registry(),
            &self.scopes(repository, Access::Push),
            &[],
            None,
        ) {
            Ok(_) => Ok(true),
            Err(OciError::Registry { status: 404, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn put_blob(
        &self,
        repository: &ArtifactRef,
        digest: &Digest,
        data: &[u8],
    ) -> Result<(), OciError> {
        digest.verify(data)?;
        self.upload(repository, digest, data)?;
        tracing::debug!(%digest, bytes = data.len(), to = %repository.name(), "uploaded blob");
        Ok(())
    }

    fn put_manifest(
        &self,
        reference: &ArtifactRef,
        manifest: &RawManifest,
    ) -> Result<Digest, OciError> {
        let url = format!(
            "{}/manifests/{}",
            self.repo_url(reference),
            reference.manifest_reference()
        );
        let response = self.call(
            "PUT",
            &url,
            reference.registry(),
            &self.scopes(reference, Access::Push),
            &[("Content-Type", manifest.media_type.as_str())],
            Some(manifest.body.as_slice()),
        )?;
        match response.header("Docker-Content-Digest") {
            Some(served) => Digest::parse(served),
            None => Ok(Digest::of(&manifest.body)),
        }
    }

    fn mount_blob(
        &self,
        from: &ArtifactRef,
        to: &ArtifactRef,
        digest: &Digest,
    ) -> Result<bool, OciError> {
        let url = format!(
            "{}/blobs/uploads/?mount={digest}&from={}",
            self.repo_url(to),
            from.repository()
        );
        let mut scopes = self.scopes(to, Access::Push);
        scopes.extend(self.scopes(from, Access::Pull));
        let response = self.call(
            "POST",
            &url,
            to.registry(),
            &scopes,
            &[("Content-Length", "0")],
            Some(&[][..]),
        )?;
        // 202 means the registry opened a regular upload instead.
        Ok(response.status() == 201)
    }
}

fn map_error(method: &'static str, url: &str, err: ureq::Error) -> OciError {
    match err {
        ureq::Error::Status(status, response) => {
            let mut body = response.into_string().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            OciError::Registry {
                method,
                url: url.to_string(),
                status,
                body: body.trim().to_string(),
            }
        }
        ureq::Error::Transport(transport) => OciError::Transport {
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

fn transport(url: &str, err: std::io::Error) -> OciError {
    OciError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(insecure: &[&str]) -> RemoteStore {
        RemoteStore::new(
            Keychain::anonymous(),
            insecure.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn local_and_listed_registries_use_plain_http() {
        let store = store(&["registry.lan:5000"]);
        assert_eq!(store.scheme("localhost:5000"), "http");
        assert_eq!(store.scheme("127.0.0.1:5000"), "http");
        assert_eq!(store.scheme("registry.lan:5000"), "http");
        assert_eq!(store.scheme("ghcr.io"), "https");
    }

    #[test]
    fn docker_hub_uses_registry_api_host() {
        let store = store(&[]);
        let reference = ArtifactRef::parse("alpine:3.19").unwrap();
        assert_eq!(
            store.repo_url(&reference),
            "https://registry-1.docker.io/v2/library/alpine"
        );
    }

    #[test]
    fn push_scope_includes_pull() {
        let store = store(&[]);
        let reference = ArtifactRef::parse("ttl.sh/spin-debug-1:24h").unwrap();
        assert_eq!(
            store.scopes(&reference, Access::Push),
            vec!["repository:spin-debug-1:pull,push".to_string()]
        );
    }
}
