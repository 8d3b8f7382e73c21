use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::{attempt_with_timeout, record_outcome, wait_for_shutdown, RetrySettings};
use crate::error::{Result, RotaError};
use crate::models::{Fetched, Proxy, RetryOutcome};
use crate::proxy::health::ProxyHealthRegistry;
use crate::proxy::pool::ProxyPool;
use crate::upstream::UpstreamOperation;

/// Stand-in deadline when the configured batch timeout overflows the clock
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Fires the same request through a batch of proxies and takes the first
/// terminal answer.
///
/// Each attempt records its own outcome in the registry as it finishes, so
/// losers still teach the registry something. Once a winner is in, the rest
/// of the batch is told to stop.
pub struct RacingStrategy {
    pool: Arc<ProxyPool>,
    health: Arc<ProxyHealthRegistry>,
    settings: RetrySettings,
    shutdown: watch::Receiver<bool>,
}

impl RacingStrategy {
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
            shutdown,
        }
    }

    #[instrument(skip(self, op), fields(kind = %op.kind()))]
    pub async fn execute<O>(&self, op: Arc<O>, target: &str) -> Result<Fetched<O::Output>>
    where
        O: UpstreamOperation + ?Sized + 'static,
    {
        let mut shutdown = self.shutdown.clone();
        let batch_size = self.settings.max_racing_proxies.max(1);
        let mut attempts = 0u32;

        for batch_no in 1..=self.settings.max_batches {
            if *shutdown.borrow() {
                return Err(RotaError::Cancelled);
            }

            let batch: Vec<Arc<Proxy>> = self
                .health
                .available_from(self.pool.all())
                .into_iter()
                .take(batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            attempts += batch.len() as u32;
            debug!(
                "Racing batch {} with {} proxies for {}",
                batch_no,
                batch.len(),
                target
            );

            if let Some(fetched) = self.race_batch(&op, target, &batch, &mut shutdown).await? {
                return Ok(fetched);
            }
        }

        error!(
            "All proxies exhausted for {} after {} attempts",
            target, attempts
        );
        Err(RotaError::AllProxiesExhausted { attempts })
    }

    /// Run one batch to completion. `None` means nobody produced a terminal
    /// answer.
    async fn race_batch<O>(
        &self,
        op: &Arc<O>,
        target: &str,
        batch: &[Arc<Proxy>],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Fetched<O::Output>>>
    where
        O: UpstreamOperation + ?Sized + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for proxy in batch {
            let op = op.clone();
            let health = self.health.clone();
            let proxy = proxy.clone();
            let target = target.to_string();
            let limit = self.settings.attempt_timeout;
            let mut cancel = cancel_rx.clone();

            tasks.spawn(async move {
                let outcome = tokio::select! {
                    outcome = attempt_with_timeout(op.as_ref(), &target, &proxy, limit) => outcome,
                    _ = wait_for_shutdown(&mut cancel) => return (proxy, None),
                };
                record_outcome(&health, &proxy, &outcome);
                (proxy, Some(outcome))
            });
        }

        let now = Instant::now();
        let deadline = now
            .checked_add(self.settings.batch_timeout())
            .unwrap_or_else(|| now + FAR_FUTURE);
        let mut reported: HashSet<Arc<Proxy>> = HashSet::new();

        let fetched = loop {
            let joined = tokio::select! {
                joined = tokio::time::timeout_at(deadline, tasks.join_next()) => Some(joined),
                _ = wait_for_shutdown(shutdown) => None,
            };
            let Some(joined) = joined else {
                let _ = cancel_tx.send(true);
                tasks.detach_all();
                return Err(RotaError::Cancelled);
            };

            match joined {
                Err(_) => {
                    warn!(
                        "Racing batch for {} hit its {:?} deadline",
                        target,
                        self.settings.batch_timeout()
                    );
                    break None;
                }
                Ok(None) => break None,
                Ok(Some(Err(e))) => {
                    warn!("Racing attempt aborted: {}", e);
                }
                Ok(Some(Ok((proxy, outcome)))) => {
                    reported.insert(proxy.clone());
                    match outcome {
                        Some(RetryOutcome::Success(value)) => {
                            info!("Fetched {} via {} (racing)", target, proxy);
                            break Some(Fetched::Data(value));
                        }
                        Some(RetryOutcome::EmptyResult(reason)) => {
                            info!("{} has no data ({:?}) via {} (racing)", target, reason, proxy);
                            break Some(Fetched::Empty(reason));
                        }
                        Some(RetryOutcome::TransientFailure(cause)) => {
                            debug!("Racing attempt via {} failed: {}", proxy, cause);
                        }
                        None => {}
                    }
                }
            }
        };

        let _ = cancel_tx.send(true);
        tasks.detach_all();

        if fetched.is_none() {
            // Members that never reported anything are treated as failed
            for proxy in batch {
                if !reported.contains(proxy) && self.health.is_available(proxy) {
                    debug!("Marking silent racing member {} dead", proxy);
                    self.health.mark_dead(proxy);
                }
            }
        }

        Ok(fetched)
    }
}
