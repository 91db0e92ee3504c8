//! Polling until a condition holds.
//!
//! One primitive backs every blocking step of the lifecycle: cluster
//! health, node pool existence, and delete completion. It polls once per
//! tick, gives up after a tick budget, and stops early when the operation
//! is cancelled.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MetaKubeError, ProvisionError, Result};

/// What happens to probe errors while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrors {
    /// Treat as "not yet"; the timeout carries no detail.
    Swallow,
    /// Treat as "not yet"; the last one is reported on timeout.
    ReportOnTimeout,
}

/// Tick-based poller.
#[derive(Debug, Clone)]
pub struct Waiter {
    interval: Duration,
    cancel: CancellationToken,
}

impl Waiter {
    /// Creates a waiter ticking every `interval`.
    #[must_use]
    pub const fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    /// Polls `probe` once per tick until it returns `Ok(true)`.
    ///
    /// The first poll happens after one interval.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Timeout`] after `max_ticks` polls without
    /// success and [`MetaKubeError::Cancelled`] when cancelled.
    pub async fn wait_until<F, Fut>(
        &self,
        operation: &str,
        max_ticks: u32,
        errors: ProbeErrors,
        mut probe: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let mut last_error = None;

        for tick in 1..=max_ticks {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(MetaKubeError::cancelled(operation));
                }
                () = tokio::time::sleep(self.interval) => {}
            }

            match probe().await {
                Ok(true) => {
                    debug!("{operation}: ready after {tick} tick(s)");
                    return Ok(());
                }
                Ok(false) => debug!("{operation}: not ready (tick {tick}/{max_ticks})"),
                Err(e) => {
                    debug!("{operation}: probe failed (tick {tick}/{max_ticks}): {e}");
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!("{operation}: gave up after {max_ticks} tick(s)");
        Err(MetaKubeError::Provision(ProvisionError::Timeout {
            operation: operation.to_string(),
            last_error: match errors {
                ProbeErrors::Swallow => None,
                ProbeErrors::ReportOnTimeout => last_error,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn waiter() -> Waiter {
        Waiter::new(Duration::from_millis(1), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_succeeds_when_probe_turns_true() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        waiter()
            .wait_until("ready", 10, ProbeErrors::Swallow, || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) >= 2) }
            })
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_after_budget() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let err = waiter()
            .wait_until("never", 4, ProbeErrors::Swallow, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(false)
                }
            })
            .await
            .unwrap_err();

        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert!(matches!(
            err,
            MetaKubeError::Provision(ProvisionError::Timeout { last_error: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_probe_errors_are_swallowed() {
        let err = waiter()
            .wait_until("flaky", 3, ProbeErrors::Swallow, || async {
                Err(MetaKubeError::internal("lookup failed"))
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MetaKubeError::Provision(ProvisionError::Timeout { last_error: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_last_probe_error_reported_on_timeout() {
        let err = waiter()
            .wait_until("node pool", 3, ProbeErrors::ReportOnTimeout, || async {
                Err(MetaKubeError::internal("lookup failed"))
            })
            .await
            .unwrap_err();

        match err {
            MetaKubeError::Provision(ProvisionError::Timeout { last_error, .. }) => {
                assert!(last_error.unwrap_or_default().contains("lookup failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let cancel = CancellationToken::new();
        let waiter = Waiter::new(Duration::from_secs(60), cancel.clone());
        cancel.cancel();

        let err = waiter
            .wait_until("health", 600, ProbeErrors::Swallow, || async { Ok(false) })
            .await
            .unwrap_err();

        assert!(matches!(err, MetaKubeError::Cancelled { .. }));
    }
}
