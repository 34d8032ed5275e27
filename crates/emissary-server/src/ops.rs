//! Operation manager: tracks in-flight tool invocations, bounds them by
//! their per-tool timeout, and collects them for fleet-wide cancellation.
//!
//! The registry holds the inner task's abort handle so a SIGTERM (or a
//! client cancel) can stop the work; the awaiting side observes the abort
//! as `Cancelled`. Map cleanup is guaranteed by a drop guard, so even an
//! aborted awaiter leaves no stale entries behind.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use emissary_core::{EmissaryError, Result};

struct OperationEntry {
    abort: AbortHandle,
    started: Instant,
}

#[derive(Default)]
pub struct OperationManager {
    active: DashMap<String, OperationEntry>,
}

/// Removes the registry entry and aborts the inner task when the awaiting
/// future is dropped (including when the awaiter itself is aborted).
struct OpGuard<'a> {
    mgr: &'a OperationManager,
    op_id: String,
    abort: AbortHandle,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.mgr.active.remove(&self.op_id);
        // A no-op when the task already finished.
        self.abort.abort();
    }
}

impl OperationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` as a tracked operation under `timeout`.
    ///
    /// Timeout aborts the local task but leaves any provider-side job
    /// running (a queued background job is reported as timed out, not
    /// cancelled server-side). External aborts surface as `Cancelled`.
    pub async fn run_with_timeout<T>(
        &self,
        op_id: String,
        timeout: Duration,
        fut: impl Future<Output = Result<T>> + Send + 'static,
    ) -> Result<T>
    where
        T: Send + 'static,
    {
        debug!(op = %op_id, timeout_secs = timeout.as_secs(), "operation starting");
        let mut handle = tokio::spawn(fut);
        self.active.insert(
            op_id.clone(),
            OperationEntry {
                abort: handle.abort_handle(),
                started: Instant::now(),
            },
        );
        let _guard = OpGuard {
            mgr: self,
            op_id: op_id.clone(),
            abort: handle.abort_handle(),
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Err(_) => {
                warn!(op = %op_id, secs = timeout.as_secs(), "operation timed out");
                Err(EmissaryError::Timeout {
                    secs: timeout.as_secs(),
                })
            }
            Ok(Err(join_err)) => {
                if join_err.is_cancelled() {
                    info!(op = %op_id, "operation cancelled");
                    Err(EmissaryError::Cancelled)
                } else {
                    Err(EmissaryError::Internal(format!(
                        "operation task panicked: {join_err}"
                    )))
                }
            }
            Ok(Ok(inner)) => {
                debug!(op = %op_id, "operation completed");
                inner
            }
        }
    }

    /// Abort every active operation. Awaiters observe `Cancelled` and clean
    /// their own registry entries; the transport's cancelled-request set is
    /// not touched here.
    pub fn cancel_all_operations(&self) -> usize {
        let mut cancelled = 0usize;
        for entry in self.active.iter() {
            entry.value().abort.abort();
            cancelled += 1;
        }
        if cancelled > 0 {
            warn!(count = cancelled, "cancelled active operations");
        }
        cancelled
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// `(op_id, elapsed)` snapshot for the periodic monitor log line.
    pub fn status(&self) -> Vec<(String, Duration)> {
        self.active
            .iter()
            .map(|e| (e.key().clone(), e.value().started.elapsed()))
            .collect()
    }

    /// Log active operations every 30s while any exist.
    pub fn spawn_monitor(mgr: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                let status = mgr.status();
                if !status.is_empty() {
                    debug!(?status, "active operations");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn success_returns_value_and_cleans_map() {
        let mgr = OperationManager::new();
        let out = mgr
            .run_with_timeout("op-1".into(), Duration::from_secs(5), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test]
    async fn timeout_is_reported_and_map_cleaned() {
        let mgr = OperationManager::new();
        let err = mgr
            .run_with_timeout("op-1".into(), Duration::from_millis(20), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EmissaryError::Timeout { .. }));
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_drains_active_operations() {
        let mgr = Arc::new(OperationManager::new());
        let runner = Arc::clone(&mgr);
        let task = tokio::spawn(async move {
            runner
                .run_with_timeout("op-slow".into(), Duration::from_secs(60), async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
                .await
        });

        // Wait for registration.
        for _ in 0..100 {
            if mgr.active_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(mgr.active_count(), 1);

        assert_eq!(mgr.cancel_all_operations(), 1);
        let result = task.await.unwrap();
        assert!(matches!(result, Err(EmissaryError::Cancelled)));
        assert_eq!(mgr.active_count(), 0);

        // The manager keeps working after a drain.
        let out = mgr
            .run_with_timeout("op-next".into(), Duration::from_secs(5), async { Ok(1) })
            .await
            .unwrap();
        assert_eq!(out, 1);
    }

    #[tokio::test]
    async fn concurrent_operations_are_independent() {
        let mgr = Arc::new(OperationManager::new());
        let a = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move {
                mgr.run_with_timeout("a".into(), Duration::from_secs(5), async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok("a")
                })
                .await
            })
        };
        let b = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move {
                mgr.run_with_timeout("b".into(), Duration::from_millis(10), async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("b")
                })
                .await
            })
        };
        assert_eq!(a.await.unwrap().unwrap(), "a");
        assert!(matches!(
            b.await.unwrap(),
            Err(EmissaryError::Timeout { .. })
        ));
        assert_eq!(mgr.active_count(), 0);
    }
}
