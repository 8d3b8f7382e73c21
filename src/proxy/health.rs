//! Per-run health tracking for upstream proxies
//!
//! Records which proxies are dead, which are cooling down after a rate-limit
//! signal, and which have worked at least once. Shared by every retry
//! strategy, so state learned on one item carries over to the next.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{FailureCause, HealthStats, Proxy};

/// Default cooldown after a rate-limit signal
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
struct HealthState {
    dead: HashSet<Proxy>,
    rate_limited: HashMap<Proxy, Instant>,
    working: HashSet<Proxy>,
    successes: u64,
    failures: u64,
}

impl HealthState {
    /// Availability check that drops an expired rate-limit entry on the way
    fn check_available(&mut self, proxy: &Proxy, now: Instant, cooldown: Duration) -> bool {
        if self.dead.contains(proxy) {
            return false;
        }

        match self.rate_limited.get(proxy) {
            Some(since) if now.saturating_duration_since(*since) <= cooldown => false,
            Some(_) => {
                self.rate_limited.remove(proxy);
                debug!("Rate-limit cooldown elapsed for {}", proxy);
                true
            }
            None => true,
        }
    }
}

/// Health registry for one downloader run.
///
/// All mutations go through a single mutex; racing attempts update it from
/// several tasks at once. Reads may be slightly stale relative to attempts
/// still in flight.
#[derive(Debug)]
pub struct ProxyHealthRegistry {
    cooldown: Duration,
    state: Mutex<HealthState>,
}

impl ProxyHealthRegistry {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Mutex::new(HealthState::default()),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// False while the proxy is dead or inside its rate-limit cooldown
    pub fn is_available(&self, proxy: &Proxy) -> bool {
        let now = Instant::now();
        self.state.lock().check_available(proxy, now, self.cooldown)
    }

    /// Exclude the proxy for the rest of the run. Idempotent for membership;
    /// every call counts as a failure.
    pub fn mark_dead(&self, proxy: &Proxy) {
        let mut state = self.state.lock();
        state.working.remove(proxy);
        state.dead.insert(proxy.clone());
        state.failures += 1;
    }

    /// Start (or restart) the cooldown window. Does not revive a dead proxy.
    pub fn mark_rate_limited(&self, proxy: &Proxy) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.rate_limited.insert(proxy.clone(), now);
        state.failures += 1;
    }

    /// Record a success. A dead proxy stays dead for the run.
    pub fn mark_success(&self, proxy: &Proxy) {
        let mut state = self.state.lock();
        state.working.insert(proxy.clone());
        state.successes += 1;
    }

    /// Apply a transient failure: rate limits cool down, everything else is fatal
    pub fn record_failure(&self, proxy: &Proxy, cause: &FailureCause) {
        if cause.is_rate_limit() {
            self.mark_rate_limited(proxy);
        } else {
            self.mark_dead(proxy);
        }
    }

    /// Filter to available proxies, keeping input order
    pub fn available_from(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        proxies
            .iter()
            .filter(|proxy| state.check_available(proxy, now, self.cooldown))
            .cloned()
            .collect()
    }

    /// Conservative exhaustion check.
    ///
    /// Counts every rate-limit entry, including ones whose cooldown has
    /// elapsed but that have not been purged yet.
    pub fn all_exhausted(&self, total_configured: usize) -> bool {
        let state = self.state.lock();
        state.dead.len() + state.rate_limited.len() >= total_configured
    }

    /// Drop rate-limit entries whose cooldown has elapsed. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let cooldown = self.cooldown;
        let mut state = self.state.lock();
        let before = state.rate_limited.len();
        state
            .rate_limited
            .retain(|_, since| now.saturating_duration_since(*since) <= cooldown);
        before - state.rate_limited.len()
    }

    pub fn is_dead(&self, proxy: &Proxy) -> bool {
        self.state.lock().dead.contains(proxy)
    }

    pub fn is_working(&self, proxy: &Proxy) -> bool {
        self.state.lock().working.contains(proxy)
    }

    /// When the proxy was last rate-limited, if it still has an entry
    pub fn rate_limited_since(&self, proxy: &Proxy) -> Option<Instant> {
        self.state.lock().rate_limited.get(proxy).copied()
    }

    pub fn stats(&self) -> HealthStats {
        let state = self.state.lock();
        HealthStats {
            working_count: state.working.len(),
            dead_count: state.dead.len(),
            rate_limited_count: state.rate_limited.len(),
            total_successes: state.successes,
            total_failures: state.failures,
        }
    }
}

impl Default for ProxyHealthRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_COOLDOWN)
    }
}
