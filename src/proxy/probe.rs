//! Start-of-run proxy probe
//!
//! Fires one un-retried attempt through every configured proxy and seeds the
//! health registry with the verdicts, so the first real target does not pay
//! for discovering dead proxies.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::models::{Proxy, RetryOutcome};
use crate::proxy::health::ProxyHealthRegistry;
use crate::proxy::strategy::attempt_with_timeout;
use crate::upstream::UpstreamOperation;

/// Probe configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Concurrent probes
    pub workers: usize,
    /// Deadline for each probe
    pub timeout: Duration,
    /// Target handed to the probe operation
    pub target: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            timeout: Duration::from_secs(20),
            target: "dQw4w9WgXcQ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeVerdict {
    Working,
    Limited,
    Dead,
}

impl ProbeVerdict {
    pub fn from_outcome<T>(outcome: &RetryOutcome<T>) -> Self {
        match outcome {
            RetryOutcome::Success(_) | RetryOutcome::EmptyResult(_) => Self::Working,
            RetryOutcome::TransientFailure(cause) if cause.is_rate_limit() => Self::Limited,
            RetryOutcome::TransientFailure(_) => Self::Dead,
        }
    }
}

/// Verdict counts for one probe round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub working: usize,
    pub limited: usize,
    pub dead: usize,
}

impl ProbeSummary {
    pub fn total(&self) -> usize {
        self.working + self.limited + self.dead
    }
}

pub struct ProxyProber {
    health: Arc<ProxyHealthRegistry>,
    config: ProbeConfig,
}

impl ProxyProber {
    pub fn new(health: Arc<ProxyHealthRegistry>, config: ProbeConfig) -> Self {
        Self { health, config }
    }

    /// Probe every proxy and apply the verdicts to the registry
    #[instrument(skip_all, fields(proxies = proxies.len()))]
    pub async fn probe_all<O>(&self, op: &O, proxies: &[Arc<Proxy>]) -> ProbeSummary
    where
        O: UpstreamOperation + ?Sized,
    {
        let workers = self.config.workers.max(1);
        info!(
            "Probing {} proxies with {} workers",
            proxies.len(),
            workers
        );

        let verdicts = futures::stream::iter(proxies.iter().cloned())
            .map(|proxy| async move {
                let verdict = self.probe_one(op, &proxy).await;
                self.apply(&proxy, verdict);
                verdict
            })
            .buffer_unordered(workers)
            .collect::<Vec<ProbeVerdict>>()
            .await;

        let mut summary = ProbeSummary::default();
        for verdict in verdicts {
            match verdict {
                ProbeVerdict::Working => summary.working += 1,
                ProbeVerdict::Limited => summary.limited += 1,
                ProbeVerdict::Dead => summary.dead += 1,
            }
        }

        info!(
            "Probe complete: {} working, {} limited, {} dead",
            summary.working, summary.limited, summary.dead
        );
        summary
    }

    async fn probe_one<O>(&self, op: &O, proxy: &Proxy) -> ProbeVerdict
    where
        O: UpstreamOperation + ?Sized,
    {
        let outcome = attempt_with_timeout(op, &self.config.target, proxy, self.config.timeout).await;
        let verdict = ProbeVerdict::from_outcome(&outcome);

        match &outcome {
            RetryOutcome::TransientFailure(cause) => {
                warn!("Proxy {} probe failed: {}", proxy, cause)
            }
            _ => debug!("Proxy {} is working", proxy),
        }
        verdict
    }

    fn apply(&self, proxy: &Proxy, verdict: ProbeVerdict) {
        match verdict {
            ProbeVerdict::Working => self.health.mark_success(proxy),
            ProbeVerdict::Limited => self.health.mark_rate_limited(proxy),
            ProbeVerdict::Dead => self.health.mark_dead(proxy),
        }
    }
}
