//! Bounded readiness wait
//!
//! The poll runs on the caller's task; no background checker is spawned.

use crate::{HoverflyError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// A side-effect-free readiness check. Errors count as "not yet healthy".
#[async_trait]
pub trait HealthIndicator: Send + Sync {
    async fn is_healthy(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct HealthChecker {
    timeout: Duration,
    retry_interval: Duration,
}

impl HealthChecker {
    pub fn new(timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            timeout,
            retry_interval,
        }
    }

    /// Poll `indicator` until it reports healthy or the timeout elapses.
    /// A zero timeout fails without polling.
    pub async fn wait_until_healthy<P>(&self, indicator: &P) -> Result<()>
    where
        P: HealthIndicator + ?Sized,
    {
        if self.timeout.is_zero() {
            warn!("Health check timeout is zero, failing without polling");
            return Err(HoverflyError::HealthCheckTimeout { timeout: self.timeout });
        }

        let deadline = Instant::now() + self.timeout;
        let mut attempts: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            attempts += 1;
            let healthy = timeout(remaining, indicator.is_healthy()).await.unwrap_or(false);
            if healthy {
                info!(attempts, "Proxy is healthy");
                return Ok(());
            }
            debug!(attempts, "Proxy not healthy yet");

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep(self.retry_interval.min(remaining)).await;
        }

        warn!(attempts, timeout = ?self.timeout, "Proxy did not become healthy in time");
        Err(HoverflyError::HealthCheckTimeout { timeout: self.timeout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedIndicator {
        calls: AtomicUsize,
        healthy_after: usize,
    }

    impl ScriptedIndicator {
        fn healthy_after(n: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                healthy_after: n,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthIndicator for ScriptedIndicator {
        async fn is_healthy(&self) -> bool {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            n >= self.healthy_after
        }
    }

    #[tokio::test]
    async fn test_succeeds_once_indicator_reports_healthy() {
        let indicator = ScriptedIndicator::healthy_after(3);
        let checker = HealthChecker::new(Duration::from_secs(5), Duration::from_millis(5));
        checker.wait_until_healthy(&indicator).await.unwrap();
        assert_eq!(indicator.calls(), 3);
    }

    #[tokio::test]
    async fn test_times_out_when_never_healthy() {
        let indicator = ScriptedIndicator::healthy_after(usize::MAX);
        let checker = HealthChecker::new(Duration::from_millis(100), Duration::from_millis(10));
        let started = Instant::now();
        let err = checker.wait_until_healthy(&indicator).await.unwrap_err();
        assert!(matches!(err, HoverflyError::HealthCheckTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(indicator.calls() > 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_never_polls() {
        let indicator = ScriptedIndicator::healthy_after(0);
        let checker = HealthChecker::new(Duration::ZERO, Duration::from_millis(10));
        let err = checker.wait_until_healthy(&indicator).await.unwrap_err();
        assert!(matches!(err, HoverflyError::HealthCheckTimeout { timeout } if timeout.is_zero()));
        assert_eq!(indicator.calls(), 0);
    }
}
