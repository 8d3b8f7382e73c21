use serde::{Deserialize, Serialize};

/// Snapshot of the proxy health registry for external reporters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HealthStats {
    /// Proxies that produced at least one success this run
    pub working_count: usize,
    /// Proxies excluded for the rest of the run
    pub dead_count: usize,
    /// Proxies with a rate-limit entry (expired entries included until purged)
    pub rate_limited_count: usize,
    pub total_successes: u64,
    pub total_failures: u64,
}

impl HealthStats {
    /// Success rate as percentage over all recorded attempts
    pub fn success_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            0.0
        } else {
            (self.total_successes as f64 / total as f64) * 100.0
        }
    }
}
