//! Fetch client
//!
//! Owns the proxy pool and health registry for one run and hands them to
//! whichever retry strategy is active. Switching strategies mid-run keeps
//! everything the registry has learned.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::info;

use crate::error::{Result, RotaError};
use crate::models::{Fetched, HealthStats, Proxy};
use crate::proxy::strategy::wait_for_shutdown;
use crate::proxy::{
    ProbeConfig, ProbeSummary, ProxyHealthRegistry, ProxyPool, ProxyProber, RacingStrategy,
    RetrySettings, SequentialStrategy, StrategyKind,
};
use crate::upstream::UpstreamOperation;

/// Stops in-flight and future fetches of the client it came from
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        wait_for_shutdown(&mut rx).await;
    }
}

pub struct FetchClient {
    pool: Arc<ProxyPool>,
    health: Arc<ProxyHealthRegistry>,
    sequential: SequentialStrategy,
    racing: RacingStrategy,
    strategy: RwLock<StrategyKind>,
    shutdown: ShutdownHandle,
}

impl FetchClient {
    /// Build a client over `proxies`. Duplicates are dropped, order is kept.
    pub fn new(proxies: Vec<Proxy>, settings: RetrySettings, cooldown: Duration) -> Result<Self> {
        if proxies.is_empty() {
            return Err(RotaError::NoProxiesAvailable);
        }

        let pool = Arc::new(ProxyPool::new(proxies));
        let health = Arc::new(ProxyHealthRegistry::new(cooldown));
        let (tx, rx) = watch::channel(false);

        info!(
            "Fetch client ready with {} proxies (cooldown {}s)",
            pool.len(),
            cooldown.as_secs()
        );

        Ok(Self {
            sequential: SequentialStrategy::new(
                pool.clone(),
                health.clone(),
                settings.clone(),
                rx.clone(),
            ),
            racing: RacingStrategy::new(pool.clone(), health.clone(), settings, rx),
            pool,
            health,
            strategy: RwLock::new(StrategyKind::default()),
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        })
    }

    pub fn with_strategy(self, kind: StrategyKind) -> Self {
        *self.strategy.write() = kind;
        self
    }

    /// Run `op` for `target` under the active strategy
    pub async fn fetch<O>(&self, op: &Arc<O>, target: &str) -> Result<Fetched<O::Output>>
    where
        O: UpstreamOperation + ?Sized + 'static,
    {
        if self.shutdown.is_shutdown() {
            return Err(RotaError::Cancelled);
        }

        match self.strategy() {
            StrategyKind::Sequential => self.sequential.execute(op.as_ref(), target).await,
            StrategyKind::Racing => self.racing.execute(op.clone(), target).await,
        }
    }

    /// Probe every proxy once and seed the registry with the verdicts
    pub async fn probe<O>(&self, op: &O, config: ProbeConfig) -> ProbeSummary
    where
        O: UpstreamOperation + ?Sized,
    {
        ProxyProber::new(self.health.clone(), config)
            .probe_all(op, self.pool.all())
            .await
    }

    pub fn strategy(&self) -> StrategyKind {
        *self.strategy.read()
    }

    pub fn set_strategy(&self, kind: StrategyKind) {
        let mut current = self.strategy.write();
        if *current != kind {
            info!("Switching retry strategy to {}", kind.as_str());
            *current = kind;
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn health(&self) -> &Arc<ProxyHealthRegistry> {
        &self.health
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn stats(&self) -> HealthStats {
        self.health.stats()
    }

    /// True when no configured proxy is currently usable
    pub fn is_exhausted(&self) -> bool {
        self.health.all_exhausted(self.pool.len())
    }
}
