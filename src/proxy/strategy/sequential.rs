use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::{attempt_with_timeout, record_outcome, wait_for_shutdown, RetrySettings};
use crate::error::{Result, RotaError};
use crate::models::{Fetched, RetryOutcome};
use crate::proxy::health::ProxyHealthRegistry;
use crate::proxy::pool::ProxyPool;
use crate::upstream::UpstreamOperation;

/// Walks the pool one proxy at a time.
///
/// A proxy that answers (with data or a target-side empty result) is pinned
/// and reused for following targets until it fails. Each call makes at most
/// one pass over the pool.
///
/// Calls may overlap on a shared client; they then share the cursor, the pin
/// and the failure counter.
pub struct SequentialStrategy {
    pool: Arc<ProxyPool>,
    health: Arc<ProxyHealthRegistry>,
    settings: RetrySettings,
    consecutive_failures: AtomicU32,
    shutdown: watch::Receiver<bool>,
}

impl SequentialStrategy {
    pub fn new(
        pool: Arc<ProxyPool>,
        health: Arc<ProxyHealthRegistry>,
        settings: RetrySettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            health,
            settings,
            consecutive_failures: AtomicU32::new(0),
            shutdown,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    #[instrument(skip(self, op), fields(kind = %op.kind()))]
    pub async fn execute<O>(&self, op: &O, target: &str) -> Result<Fetched<O::Output>>
    where
        O: UpstreamOperation + ?Sized,
    {
        let mut shutdown = self.shutdown.clone();

        // Threshold check and reset are one atomic step
        let threshold = self.settings.max_consecutive_failures;
        let mut force_rotate = match self.consecutive_failures.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |failures| (failures >= threshold).then_some(0),
        ) {
            Ok(failures) => {
                warn!(
                    "{} consecutive failures, abandoning current proxy",
                    failures
                );
                true
            }
            Err(_) => false,
        };

        let mut attempts = 0u32;
        for _ in 0..self.pool.len() {
            if *shutdown.borrow() {
                return Err(RotaError::Cancelled);
            }

            let Some(proxy) = self.pool.next(std::mem::take(&mut force_rotate)) else {
                break;
            };

            if !self.health.is_available(&proxy) {
                debug!("Skipping unavailable proxy {}", proxy);
                self.pool.mark_failed();
                continue;
            }

            attempts += 1;
            debug!("Attempt {} via {}", attempts, proxy);

            let outcome = tokio::select! {
                outcome = attempt_with_timeout(op, target, &proxy, self.settings.attempt_timeout) => outcome,
                _ = wait_for_shutdown(&mut shutdown) => return Err(RotaError::Cancelled),
            };
            record_outcome(&self.health, &proxy, &outcome);

            match outcome {
                RetryOutcome::Success(value) => {
                    self.pool.pin(proxy.clone());
                    self.consecutive_failures.store(0, Ordering::Release);
                    info!("Fetched {} via {}", target, proxy);
                    return Ok(Fetched::Data(value));
                }
                RetryOutcome::EmptyResult(reason) => {
                    self.pool.pin(proxy.clone());
                    self.consecutive_failures.store(0, Ordering::Release);
                    info!("{} has no data ({:?}) via {}", target, reason, proxy);
                    return Ok(Fetched::Empty(reason));
                }
                RetryOutcome::TransientFailure(cause) => {
                    self.pool.mark_failed();
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(
                        "Proxy {} failed ({} in a row): {}",
                        proxy, failures, cause
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.next_delay()) => {}
                        _ = wait_for_shutdown(&mut shutdown) => return Err(RotaError::Cancelled),
                    }
                }
            }
        }

        error!(
            "All proxies exhausted for {} after {} attempts",
            target, attempts
        );
        Err(RotaError::AllProxiesExhausted { attempts })
    }
}
