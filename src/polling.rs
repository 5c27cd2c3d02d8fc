//! Bounded status polling.
//!
//! Physical completion (a stage reaching its target, a laser sweep ending) is
//! observed by sleeping and asking the driver again. Every loop here has an upper
//! bound and a cancellation check so a stuck instrument surfaces as
//! [`ScanError::HardwareTimeout`] instead of hanging the scan.

use crate::error::{ScanError, ScanResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Defines how often and for how long a condition is polled.
#[derive(Clone, Debug)]
pub struct PollPolicy {
    /// Delay between two status queries.
    pub interval: Duration,
    /// Maximum total time spent waiting.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Shared stop request, checked by every poll loop and between scan lines.
///
/// Waiters parked in [`cancelled`](Self::cancelled) wake as soon as
/// [`cancel`](Self::cancel) is called.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Clears a previous request before a new scan starts.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns `Err(ScanError::Cancelled)` if a stop was requested.
    pub fn check(&self) -> ScanResult<()> {
        if self.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once a stop is requested; immediately if one already was.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Polls `check` until it reports `true`.
///
/// The condition is queried first and then after every `policy.interval`. Returns
/// the number of queries made. Fails with `HardwareTimeout` once `policy.timeout`
/// has elapsed, with `Cancelled` as soon as the token fires (the wait between
/// two queries is interrupted), or with the first error the check itself returns.
pub async fn poll_until<F, Fut>(
    what: &str,
    policy: &PollPolicy,
    cancel: &CancelToken,
    mut check: F,
) -> ScanResult<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ScanResult<bool>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    loop {
        cancel.check()?;
        attempts += 1;
        if check().await? {
            trace!(what, attempts, "condition reached");
            return Ok(attempts);
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(ScanError::HardwareTimeout {
                what: what.to_string(),
                elapsed,
            });
        }
        tokio::select! {
            _ = sleep(policy.interval.min(policy.timeout - elapsed)) => {}
            _ = cancel.cancelled() => {
                trace!(what, attempts, "wait interrupted");
                return Err(ScanError::Cancelled);
            }
        }
    }
}
