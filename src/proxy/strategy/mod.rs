//! Retry strategies
//!
//! Both strategies drive an [`UpstreamOperation`] across the proxy pool until
//! it yields data or a target-side empty result, feeding every outcome back
//! into the shared [`ProxyHealthRegistry`](crate::proxy::ProxyHealthRegistry).

mod racing;
mod sequential;

pub use racing::RacingStrategy;
pub use sequential::SequentialStrategy;

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::models::{FailureCause, Proxy, RetryOutcome};
use crate::proxy::health::ProxyHealthRegistry;
use crate::upstream::UpstreamOperation;

/// Strategy types for walking the proxy pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// One proxy at a time, sticking with the last one that worked
    #[default]
    Sequential,
    /// Same request to a batch of proxies at once, first answer wins
    Racing,
}

impl StrategyKind {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "racing" | "race" | "concurrent" => Self::Racing,
            _ => Self::Sequential,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Racing => "racing",
        }
    }
}

/// Tunables shared by both strategies
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Hard deadline for a single attempt
    pub attempt_timeout: Duration,
    /// Pause after a transient failure (sequential only)
    pub retry_delay: Duration,
    /// Upper bound of random extra delay added to `retry_delay`
    pub retry_jitter: Duration,
    /// Consecutive failures before the pinned proxy is abandoned
    pub max_consecutive_failures: u32,
    /// Batch size for racing
    pub max_racing_proxies: usize,
    /// Added to `attempt_timeout` to form the racing batch deadline
    pub batch_margin: Duration,
    /// Racing outer-loop cap
    pub max_batches: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(20),
            retry_delay: Duration::from_secs(1),
            retry_jitter: Duration::from_millis(250),
            max_consecutive_failures: 3,
            max_racing_proxies: 10,
            batch_margin: Duration::from_secs(10),
            max_batches: 30,
        }
    }
}

impl RetrySettings {
    pub fn batch_timeout(&self) -> Duration {
        self.attempt_timeout.saturating_add(self.batch_margin)
    }

    /// `retry_delay` plus a random share of `retry_jitter`
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.retry_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.retry_delay;
        }
        self.retry_delay
            .saturating_add(Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms)))
    }
}

/// Run one attempt under a hard deadline. Overrunning is a transient failure.
pub(crate) async fn attempt_with_timeout<O>(
    op: &O,
    target: &str,
    proxy: &Proxy,
    limit: Duration,
) -> RetryOutcome<O::Output>
where
    O: UpstreamOperation + ?Sized,
{
    match tokio::time::timeout(limit, op.attempt(target, proxy)).await {
        Ok(outcome) => outcome,
        Err(_) => RetryOutcome::TransientFailure(FailureCause::timeout(limit)),
    }
}

/// Fold one attempt's outcome into the registry
pub(crate) fn record_outcome<T>(health: &ProxyHealthRegistry, proxy: &Proxy, outcome: &RetryOutcome<T>) {
    match outcome {
        RetryOutcome::Success(_) | RetryOutcome::EmptyResult(_) => health.mark_success(proxy),
        RetryOutcome::TransientFailure(cause) => health.record_failure(proxy, cause),
    }
}

/// Resolves once the flag flips to `true`. Never resolves if the sender is
/// dropped without signalling.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
