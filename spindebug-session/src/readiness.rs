use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use spindebug_core::{ReadinessConfig, Workload, WorkloadKey};

use crate::error::{SessionError, Stage};
use crate::task::blocking;
use crate::workload::WorkloadApi;

/// Outcome of waiting for a swapped workload to come up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready(Workload),
    /// Deadline passed; `last` is the most recent successful observation.
    TimedOut { last: Option<Workload> },
}

/// Poll `key` every `poll_interval` until ready replicas equal desired
/// replicas or `timeout` elapses.
///
/// The first poll happens one interval after the call. Failed reads are
/// logged and polling continues; only the deadline ends an unready wait.
pub async fn wait_ready<W: WorkloadApi>(
    api: Arc<W>,
    key: &WorkloadKey,
    config: &ReadinessConfig,
) -> Result<Readiness, SessionError> {
    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // consume the first immediate tick

    let deadline = tokio::time::sleep(config.timeout());
    tokio::pin!(deadline);

    let mut last = None;
    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::warn!(workload = %key, timeout = ?config.timeout(), "workload not ready before deadline");
                return Ok(Readiness::TimedOut { last });
            }
            _ = ticker.tick() => {
                let api = api.clone();
                let poll_key = key.clone();
                match blocking(Stage::Readiness, move || api.get(&poll_key)).await? {
                    Ok(workload) if workload.is_ready() => {
                        tracing::info!(workload = %key, replicas = workload.replicas, "workload ready");
                        return Ok(Readiness::Ready(workload));
                    }
                    Ok(workload) => {
                        tracing::debug!(
                            workload = %key,
                            ready = workload.ready_replicas,
                            desired = workload.replicas,
                            "waiting for replicas"
                        );
                        last = Some(workload);
                    }
                    Err(err) => {
                        tracing::warn!(workload = %key, error = %err, "readiness poll failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::error::ClusterError;

    /// Becomes ready on the `ready_on`-th read.
    struct Countdown {
        reads: AtomicUsize,
        ready_on: usize,
    }

    impl WorkloadApi for Countdown {
        fn get(&self, key: &WorkloadKey) -> Result<Workload, ClusterError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Workload {
                key: key.clone(),
                image: "ttl.sh/spin-debug-1:24h".to_string(),
                replicas: 2,
                ready_replicas: if n >= self.ready_on { 2 } else { 1 },
            })
        }

        fn update(&self, _workload: &Workload) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    fn config() -> ReadinessConfig {
        ReadinessConfig {
            poll_interval_secs: 5,
            timeout_secs: 60,
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn ready_on_third_poll_takes_three_intervals() {
        let api = Arc::new(Countdown {
            reads: AtomicUsize::new(0),
            ready_on: 3,
        });
        let started = tokio::time::Instant::now();
        let outcome = wait_ready(api.clone(), &WorkloadKey::new("apps", "hello"), &config())
            .await
            .unwrap();

        assert!(matches!(outcome, Readiness::Ready(ref w) if w.ready_replicas == 2));
        assert_eq!(api.reads.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn never_ready_times_out_at_deadline() {
        let api = Arc::new(Countdown {
            reads: AtomicUsize::new(0),
            ready_on: usize::MAX,
        });
        let started = tokio::time::Instant::now();
        let outcome = wait_ready(api.clone(), &WorkloadKey::new("apps", "hello"), &config())
            .await
            .unwrap();

        match outcome {
            Readiness::TimedOut { last: Some(last) } => assert_eq!(last.ready_replicas, 1),
            other => panic!("expected timeout with an observation, got {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert!(api.reads.load(Ordering::SeqCst) >= 11);
    }
}
