//! `spindebug debug` — swap, attach, restore.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::sync::oneshot;

use spindebug_core::{DebugConfig, WorkloadKey};
use spindebug_oci::RemoteStore;
use spindebug_session::{
    AttachOptions, DebugSession, Kubectl, SessionError, SessionLock, SessionRequest,
    StoreImageBuilder,
};

/// Arguments for `spindebug debug`.
#[derive(Args, Debug)]
pub struct DebugArgs {
    /// SpinApp name. Defaults to `[application] name` of ./spin.toml.
    pub name: Option<String>,

    /// Component to replace with the debug shim.
    #[arg(long, short)]
    pub component: String,

    /// Namespace of the SpinApp.
    #[arg(long, short, default_value = "default")]
    pub namespace: String,

    /// Kube context to use instead of the current one.
    #[arg(long)]
    pub context: Option<String>,

    /// Path to a kubeconfig file.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Container to attach to when the pod runs several.
    #[arg(long)]
    pub container: Option<String>,
}

impl DebugArgs {
    pub fn run(self, config: &DebugConfig) -> Result<()> {
        let name = match self.name.clone() {
            Some(name) => name,
            None => app_name_from_cwd()?,
        };
        let key = WorkloadKey::new(self.namespace.clone(), name);

        let _lock = SessionLock::acquire(&key)?;

        let kubectl = Arc::new(
            Kubectl::new(config.kubectl.clone())
                .with_context(self.context.clone())
                .with_kubeconfig(self.kubeconfig.clone()),
        );
        let store = RemoteStore::from_config(config).context("failed to load registry credentials")?;
        let builder = Arc::new(StoreImageBuilder::new(store, config.clone()));

        let request = SessionRequest {
            workload: key.clone(),
            component: self.component.clone(),
            attach: AttachOptions {
                container: self.container.clone(),
                ..AttachOptions::default()
            },
        };

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        let mut session = DebugSession::new(kubectl.clone(), kubectl, builder, config);
        let result = rt.block_on(async {
            let interrupted = listen_for_interrupt().await;
            session.run_until(&request, interrupted).await
        });
        // An interrupted build may still be running on a blocking thread.
        rt.shutdown_timeout(Duration::from_secs(1));

        match result {
            Ok(report) => {
                tracing::info!(
                    workload = %report.workload,
                    attempts = report.restore_attempts,
                    attach_error = report.attach_error.is_some(),
                    "debug session finished"
                );
                println!(
                    "{} {} restored to {} ({} attempt{})",
                    "✓".green().bold(),
                    report.workload,
                    report.original.cyan(),
                    report.restore_attempts,
                    if report.restore_attempts == 1 { "" } else { "s" }
                );
                println!("  debug image: {}", report.debug.to_string().bright_black());
                if let Some(err) = report.attach_error {
                    println!("  {} attach ended with: {err}", "!".yellow().bold());
                }
                Ok(())
            }
            Err(err) => {
                report_failure(&key, &err);
                Err(err.into())
            }
        }
    }
}

/// Resolves on the first Ctrl-C.
///
/// The handler is registered before this returns, so an interrupt never
/// falls through to the default handler and skips the restore.
async fn listen_for_interrupt() -> impl std::future::Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received; stopping the session");
                let _ = tx.send(());
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for Ctrl-C");
                // Keep `tx` alive so the session is never stopped.
                std::future::pending::<()>().await;
                drop(tx);
            }
        }
    });
    tokio::task::yield_now().await;
    async move {
        let _ = rx.await;
    }
}

fn app_name_from_cwd() -> Result<String> {
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    match spindebug_manifest::app_name_in_dir(&cwd)? {
        Some(name) => Ok(name),
        None => bail!(
            "no app name given and no spin.toml in {}; pass the SpinApp name",
            cwd.display()
        ),
    }
}

fn report_failure(key: &WorkloadKey, err: &SessionError) {
    if !err.workload_swapped() {
        return;
    }
    eprintln!();
    eprintln!(
        "{}",
        format!("!! {key} may still be running a debug image !!").red().bold()
    );
    if let SessionError::RestoreFailed {
        debug, original, ..
    } = err
    {
        eprintln!("   current:  {debug}");
        eprintln!("   restore:  {original}");
        eprintln!(
            "   run: kubectl patch spinapp {} -n {} --type merge -p '{{\"spec\":{{\"image\":\"{original}\"}}}}'",
            key.name, key.namespace
        );
    }
    eprintln!();
}
