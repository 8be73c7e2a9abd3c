//! Scoped swap of a workload's image.
//!
//! [`SwapGuard::acquire`] writes the debug image; [`SwapGuard::release`]
//! writes the original back with bounded retries. A guard dropped without
//! release (early return, panic, cancelled future) makes one synchronous
//! restore attempt from `Drop`.

use std::sync::Arc;

use spindebug_core::{RestoreConfig, Workload, WorkloadKey};

use crate::error::{ClusterError, SessionError, Stage};
use crate::task::blocking;
use crate::workload::WorkloadApi;

/// How a successful restore went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub attempts: u32,
    /// The workload already carried the original image.
    pub already_restored: bool,
}

pub struct SwapGuard<W: WorkloadApi> {
    api: Arc<W>,
    key: WorkloadKey,
    original: String,
    debug: String,
    policy: RestoreConfig,
    armed: bool,
}

impl<W: WorkloadApi> SwapGuard<W> {
    /// Point `captured` at `debug` and persist it.
    ///
    /// `captured` must be the workload as read before the swap; its image is
    /// what release restores. On a failed write the workload is re-read and,
    /// if the debug image landed anyway, restored before the error returns.
    pub async fn acquire(
        api: Arc<W>,
        captured: &Workload,
        debug: String,
        policy: RestoreConfig,
    ) -> Result<Self, SessionError> {
        let mut swapped = captured.clone();
        swapped.image = debug.clone();

        let writer = api.clone();
        let result = blocking(Stage::Swap, move || writer.update(&swapped)).await?;

        let mut guard = Self {
            api,
            key: captured.key.clone(),
            original: captured.image.clone(),
            debug,
            policy,
            armed: true,
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    workload = %guard.key,
                    original = %guard.original,
                    debug = %guard.debug,
                    "swapped workload image"
                );
                Ok(guard)
            }
            Err(source) => {
                guard.armed = false;
                let api = guard.api.clone();
                let (key, original, debug) =
                    (guard.key.clone(), guard.original.clone(), guard.debug.clone());
                let reconciled =
                    blocking(Stage::Swap, move || restore_once(&*api, &key, &original, &debug))
                        .await
                        .map_err(|e| e.to_string())
                        .and_then(|r| r.map_err(|e| e.to_string()));
                match reconciled {
                    Ok(_) => tracing::info!(
                        workload = %guard.key,
                        "workload verified on original image after failed swap"
                    ),
                    Err(err) => tracing::error!(
                        workload = %guard.key,
                        error = %err,
                        "could not verify workload image after failed swap"
                    ),
                }
                Err(SessionError::WorkloadUpdate {
                    workload: guard.key.clone(),
                    image: guard.debug.clone(),
                    source,
                })
            }
        }
    }

    pub fn key(&self) -> &WorkloadKey {
        &self.key
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn debug(&self) -> &str {
        &self.debug
    }

    /// Restore the original image, retrying with exponential backoff.
    pub async fn release(mut self) -> Result<RestoreOutcome, SessionError> {
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let api = self.api.clone();
            let (key, original, debug) =
                (self.key.clone(), self.original.clone(), self.debug.clone());
            let result =
                blocking(Stage::Restore, move || restore_once(&*api, &key, &original, &debug))
                    .await?;

            match result {
                Ok(already_restored) => {
                    self.armed = false;
                    tracing::info!(
                        workload = %self.key,
                        image = %self.original,
                        attempts = attempt,
                        "restored workload image"
                    );
                    return Ok(RestoreOutcome {
                        attempts: attempt,
                        already_restored,
                    });
                }
                Err(err) if attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt - 1);
                    tracing::warn!(
                        workload = %self.key,
                        attempt,
                        max_attempts,
                        retry_in = ?delay,
                        error = %err,
                        "restore failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    self.armed = false;
                    tracing::error!(
                        workload = %self.key,
                        debug = %self.debug,
                        original = %self.original,
                        attempts = attempt,
                        error = %source,
                        "RESTORE FAILED: workload is still running the debug image"
                    );
                    return Err(SessionError::RestoreFailed {
                        workload: self.key.clone(),
                        debug: self.debug.clone(),
                        original: self.original.clone(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

impl<W: WorkloadApi> Drop for SwapGuard<W> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(workload = %self.key, "swap guard dropped without release; restoring");
        match restore_once(&*self.api, &self.key, &self.original, &self.debug) {
            Ok(_) => tracing::info!(
                workload = %self.key,
                image = %self.original,
                "restored workload image"
            ),
            Err(err) => tracing::error!(
                workload = %self.key,
                debug = %self.debug,
                original = %self.original,
                error = %err,
                "RESTORE FAILED: workload is still running the debug image"
            ),
        }
    }
}

/// Re-read the workload and write the original image back.
///
/// Returns `true` when the workload already had the original image.
fn restore_once<W: WorkloadApi + ?Sized>(
    api: &W,
    key: &WorkloadKey,
    original: &str,
    debug: &str,
) -> Result<bool, ClusterError> {
    let mut current = api.get(key)?;
    if current.image == original {
        return Ok(true);
    }
    if current.image != debug {
        // Bind outside the macro: `debug` would resolve to `tracing::field::debug` inside it.
        let expected = debug;
        tracing::warn!(
            workload = %key,
            found = %current.image,
            expected = %expected,
            "workload image changed during the session; restoring anyway"
        );
    }
    current.image = original.to_string();
    api.update(&current)?;
    Ok(false)
}
