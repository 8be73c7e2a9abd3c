//! `kubectl`-backed workload access and attach.
//!
//! Workloads are `SpinApp` resources: the image lives at `spec.image`, the
//! desired count at `spec.replicas`, and readiness at `status.readyReplicas`.
//! Attach goes through the Deployment the operator creates for each app.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;
use serde_json::json;

use spindebug_core::{Workload, WorkloadKey};

use crate::error::{io_err, ClusterError};
use crate::workload::{AttachOptions, AttachSession, WorkloadApi};

const RESOURCE: &str = "spinapp";

#[derive(Debug, Clone)]
pub struct Kubectl {
    program: PathBuf,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

impl Kubectl {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            context: None,
            kubeconfig: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    /// `kubectl` with this client's connection flags; every call, attach
    /// included, targets the same cluster.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd
    }

    /// Run to completion and return stdout.
    fn run(&self, key: &WorkloadKey, args: &[&str]) -> Result<String, ClusterError> {
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| io_err(&self.program, e))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("NotFound") {
            return Err(ClusterError::NotFound(key.clone()));
        }
        Err(ClusterError::Command {
            program: self.program.display().to_string(),
            args: args.join(" "),
            status: output.status.to_string(),
            stderr,
        })
    }
}

// ---------------------------------------------------------------------------
// SpinApp document
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SpinApp {
    spec: SpinAppSpec,
    #[serde(default)]
    status: Option<SpinAppStatus>,
}

#[derive(Debug, Deserialize)]
struct SpinAppSpec {
    image: String,
    #[serde(default = "default_replicas")]
    replicas: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpinAppStatus {
    #[serde(default)]
    ready_replicas: i32,
}

fn default_replicas() -> i32 {
    1
}

fn parse_workload(key: &WorkloadKey, raw: &str) -> Result<Workload, ClusterError> {
    let app: SpinApp = serde_json::from_str(raw).map_err(|e| ClusterError::Malformed {
        workload: key.clone(),
        message: e.to_string(),
    })?;
    Ok(Workload {
        key: key.clone(),
        image: app.spec.image,
        replicas: app.spec.replicas,
        ready_replicas: app.status.unwrap_or_default().ready_replicas,
    })
}

impl WorkloadApi for Kubectl {
    fn get(&self, key: &WorkloadKey) -> Result<Workload, ClusterError> {
        let raw = self.run(
            key,
            &["get", RESOURCE, &key.name, "-n", &key.namespace, "-o", "json"],
        )?;
        parse_workload(key, &raw)
    }

    fn update(&self, workload: &Workload) -> Result<(), ClusterError> {
        let patch = json!({ "spec": { "image": workload.image } }).to_string();
        let key = &workload.key;
        self.run(
            key,
            &[
                "patch",
                RESOURCE,
                &key.name,
                "-n",
                &key.namespace,
                "--type",
                "merge",
                "-p",
                &patch,
            ],
        )?;
        tracing::debug!(workload = %key, image = %workload.image, "patched workload image");
        Ok(())
    }
}

impl AttachSession for Kubectl {
    fn attach(&self, key: &WorkloadKey, options: &AttachOptions) -> Result<(), ClusterError> {
        let args = attach_args(key, options);
        let status = self
            .command()
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| io_err(&self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(ClusterError::Command {
                program: self.program.display().to_string(),
                args: args.join(" "),
                status: status.to_string(),
                stderr: String::new(),
            })
        }
    }
}

fn attach_args(key: &WorkloadKey, options: &AttachOptions) -> Vec<String> {
    let mut args = vec![
        "attach".to_string(),
        "-n".to_string(),
        key.namespace.clone(),
    ];
    if options.stdin {
        args.push("-i".to_string());
    }
    if options.tty {
        args.push("-t".to_string());
    }
    if let Some(container) = &options.container {
        args.push("-c".to_string());
        args.push(container.clone());
    }
    args.push(format!("deploy/{}", key.name));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> WorkloadKey {
        WorkloadKey::new("apps", "hello")
    }

    #[test]
    fn parses_spinapp_json() {
        let raw = r#"{
  "apiVersion": "core.spinkube.dev/v1alpha1",
  "kind": "SpinApp",
  "metadata": {"name": "hello", "namespace": "apps"},
  "spec": {"image": "ghcr.io/acme/hello:v1", "replicas": 2, "executor": "containerd-shim-spin"},
  "status": {"readyReplicas": 1, "activeScheduler": "containerd-shim-spin"}
}"#;
        let workload = parse_workload(&key(), raw).unwrap();
        assert_eq!(workload.image, "ghcr.io/acme/hello:v1");
        assert_eq!(workload.replicas, 2);
        assert_eq!(workload.ready_replicas, 1);
    }

    #[test]
    fn missing_status_and_replicas_use_defaults() {
        let raw = r#"{"spec": {"image": "ghcr.io/acme/hello:v1"}}"#;
        let workload = parse_workload(&key(), raw).unwrap();
        assert_eq!(workload.replicas, 1);
        assert_eq!(workload.ready_replicas, 0);
    }

    #[test]
    fn malformed_document_names_workload() {
        let err = parse_workload(&key(), r#"{"spec": {}}"#).unwrap_err();
        assert!(matches!(err, ClusterError::Malformed { .. }));
        assert!(err.to_string().contains("apps/hello"));
    }

    #[test]
    fn attach_args_follow_options() {
        let args = attach_args(&key(), &AttachOptions::default());
        assert_eq!(args, ["attach", "-n", "apps", "-i", "-t", "deploy/hello"]);

        let options = AttachOptions {
            stdin: false,
            tty: false,
            container: Some("app".to_string()),
            ..AttachOptions::default()
        };
        let args = attach_args(&key(), &options);
        assert_eq!(args, ["attach", "-n", "apps", "-c", "app", "deploy/hello"]);
    }

    #[test]
    fn connection_flags_come_from_the_client() {
        let args = |kubectl: &Kubectl| -> Vec<String> {
            kubectl
                .command()
                .get_args()
                .map(|a| a.to_string_lossy().into_owned())
                .collect()
        };

        assert!(args(&Kubectl::new("kubectl")).is_empty());

        let kubectl = Kubectl::new("kubectl")
            .with_context(Some("staging".to_string()))
            .with_kubeconfig(Some(PathBuf::from("/tmp/kc")));
        assert_eq!(args(&kubectl), ["--kubeconfig", "/tmp/kc", "--context", "staging"]);
    }

    #[test]
    fn missing_binary_is_io_error() {
        let kubectl = Kubectl::new("/nonexistent/kubectl-for-tests");
        let err = kubectl.get(&key()).unwrap_err();
        assert!(matches!(err, ClusterError::Io { .. }));
    }
}
