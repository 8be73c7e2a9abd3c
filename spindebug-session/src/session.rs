//! The debug session state machine.
//!
//! ```text
//! Idle ─build─▶ ArtifactBuilt ─swap─▶ Swapped ─poll─▶ Ready ─attach─▶ Attached ─restore─▶ Restored
//!   └──────────────┴──────────────────────┴────────────────┴──────────────────┴──▶ Aborted
//! ```
//!
//! From `Swapped` onward the original image is held by a [`SwapGuard`] owned
//! by the session, so every exit path restores it: a finished or failed run
//! releases it, [`DebugSession::run_until`] releases it when interrupted, and
//! a session dropped mid-run (its run future cancelled) falls back to the
//! guard's own `Drop`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use spindebug_core::{ArtifactRef, DebugConfig, ReadinessConfig, RestoreConfig, WorkloadKey};
use spindebug_oci::OciError;

use crate::error::{SessionError, Stage};
use crate::guard::{RestoreOutcome, SwapGuard};
use crate::readiness::{wait_ready, Readiness};
use crate::task::blocking;
use crate::workload::{AttachOptions, AttachSession, ImageBuilder, WorkloadApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ArtifactBuilt,
    Swapped,
    Ready,
    Attached,
    Restored,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::ArtifactBuilt => "artifact-built",
            SessionState::Swapped => "swapped",
            SessionState::Ready => "ready",
            SessionState::Attached => "attached",
            SessionState::Restored => "restored",
            SessionState::Aborted => "aborted",
        })
    }
}

/// What to debug and how to attach.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub workload: WorkloadKey,
    pub component: String,
    pub attach: AttachOptions,
}

/// Summary of a session that restored its workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub workload: WorkloadKey,
    pub original: String,
    pub debug: ArtifactRef,
    /// The attach step ended with this error; the session still restored.
    pub attach_error: Option<String>,
    pub restore_attempts: u32,
    pub final_state: SessionState,
}

pub struct DebugSession<W: WorkloadApi, A, B> {
    workloads: Arc<W>,
    attach: Arc<A>,
    builder: Arc<B>,
    readiness: ReadinessConfig,
    restore: RestoreConfig,
    state: SessionState,
    /// Held from the swap until the restore; outlives a cancelled run.
    guard: Option<SwapGuard<W>>,
}

impl<W, A, B> DebugSession<W, A, B>
where
    W: WorkloadApi,
    A: AttachSession,
    B: ImageBuilder,
{
    pub fn new(workloads: Arc<W>, attach: Arc<A>, builder: Arc<B>, config: &DebugConfig) -> Self {
        Self {
            workloads,
            attach,
            builder,
            readiness: config.readiness.clone(),
            restore: config.restore.clone(),
            state: SessionState::Idle,
            guard: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive one session to `Restored` or `Aborted`.
    pub async fn run(&mut self, request: &SessionRequest) -> Result<SessionReport, SessionError> {
        self.run_until(request, std::future::pending::<()>()).await
    }

    /// [`run`](Self::run), stopped early when `shutdown` completes.
    ///
    /// `shutdown` is only honoured while building and while waiting for
    /// readiness. The swap and the restore always run to completion, and the
    /// attach step ends when the remote session does. A session stopped
    /// during the readiness wait restores the original image with the normal
    /// retry policy before returning [`SessionError::Interrupted`].
    pub async fn run_until<F>(
        &mut self,
        request: &SessionRequest,
        shutdown: F,
    ) -> Result<SessionReport, SessionError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let result = self.drive(request, shutdown).await;
        self.finish(request, result)
    }

    async fn interrupted(&mut self, key: &WorkloadKey) -> SessionError {
        let state = self.state;
        tracing::warn!(workload = %key, %state, "session interrupted");
        let restored = match self.guard.take() {
            Some(guard) => match guard.release().await {
                Ok(_) => true,
                Err(err) => return err,
            },
            None => false,
        };
        SessionError::Interrupted {
            workload: key.clone(),
            state,
            restored,
        }
    }

    fn finish(
        &mut self,
        request: &SessionRequest,
        result: Result<SessionReport, SessionError>,
    ) -> Result<SessionReport, SessionError> {
        if let Err(err) = &result {
            self.transition(SessionState::Aborted);
            tracing::error!(
                workload = %request.workload,
                stage = %err.stage(),
                swapped = err.workload_swapped(),
                error = %err,
                "debug session aborted"
            );
        }
        result
    }

    async fn drive<F>(
        &mut self,
        request: &SessionRequest,
        mut shutdown: Pin<&mut F>,
    ) -> Result<SessionReport, SessionError>
    where
        F: Future<Output = ()>,
    {
        let key = request.workload.clone();

        // Idle → ArtifactBuilt
        let api = self.workloads.clone();
        let read_key = key.clone();
        let captured = blocking(Stage::Build, move || api.get(&read_key))
            .await?
            .map_err(|source| SessionError::WorkloadRead {
                workload: key.clone(),
                source,
            })?;
        let original =
            ArtifactRef::parse(&captured.image).map_err(|e| SessionError::ReferenceResolution {
                reference: captured.image.clone(),
                source: OciError::from(e),
            })?;
        tracing::info!(
            workload = %key,
            original = %original,
            component = %request.component,
            "building debug image"
        );

        let builder = self.builder.clone();
        let component = request.component.clone();
        let build_ref = original.clone();
        let build = blocking(Stage::Build, move || builder.build(&build_ref, &component));
        let image = tokio::select! {
            biased;
            _ = shutdown.as_mut() => return Err(self.interrupted(&key).await),
            built = build => built??,
        };
        self.transition(SessionState::ArtifactBuilt);

        // ArtifactBuilt → Swapped
        let guard = SwapGuard::acquire(
            self.workloads.clone(),
            &captured,
            image.debug.to_string(),
            self.restore.clone(),
        )
        .await?;
        self.guard = Some(guard);
        self.transition(SessionState::Swapped);

        // Swapped → Ready
        let readiness_config = self.readiness.clone();
        let readiness = tokio::select! {
            biased;
            _ = shutdown.as_mut() => return Err(self.interrupted(&key).await),
            polled = wait_ready(self.workloads.clone(), &key, &readiness_config) => polled?,
        };
        match readiness {
            Readiness::Ready(_) => self.transition(SessionState::Ready),
            Readiness::TimedOut { .. } => {
                let timeout = self.readiness.timeout();
                return match self.release().await {
                    Ok(_) => Err(SessionError::ReadinessTimeout {
                        workload: key,
                        timeout,
                    }),
                    Err(restore_err) => {
                        tracing::error!(
                            workload = %key,
                            timeout = ?timeout,
                            "workload never became ready"
                        );
                        Err(restore_err)
                    }
                };
            }
        }

        // Ready → Attached
        tracing::info!(
            workload = %key,
            "attaching; end the session to restore the original image"
        );
        let attach = self.attach.clone();
        let attach_key = key.clone();
        let options = request.attach.clone();
        let attach_error = match blocking(Stage::Attach, move || {
            attach.attach(&attach_key, &options)
        })
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                tracing::warn!(
                    workload = %key,
                    error = %err,
                    "attach session ended with an error"
                );
                Some(err.to_string())
            }
            Err(err) => {
                tracing::warn!(workload = %key, error = %err, "attach task failed");
                Some(err.to_string())
            }
        };
        self.transition(SessionState::Attached);

        // Attached → Restored
        let outcome = self.release().await?;
        self.transition(SessionState::Restored);

        Ok(SessionReport {
            workload: key,
            original: captured.image,
            debug: image.debug,
            attach_error,
            restore_attempts: outcome.attempts,
            final_state: self.state,
        })
    }

    async fn release(&mut self) -> Result<RestoreOutcome, SessionError> {
        match self.guard.take() {
            Some(guard) => guard.release().await,
            None => Err(SessionError::Task {
                stage: Stage::Restore,
                message: "no swap to restore".to_string(),
            }),
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
    }
}
