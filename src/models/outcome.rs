use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why an upstream answered without data.
///
/// Both reasons are properties of the target, not of the proxy used, so
/// they are never retried elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// No transcript / captions / entries exist for the target
    NoData,
    /// Target is private, removed or otherwise unavailable
    TargetUnavailable,
}

/// How a transient failure should be held against the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection refused, DNS, proxy handshake or protocol failure
    Network,
    /// Attempt exceeded its deadline
    Timeout,
    /// Upstream throttled or blocked the proxy
    RateLimited,
}

/// Cause of a transient failure on one proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCause {
    pub kind: FailureKind,
    pub message: String,
}

/// Substrings upstreams use to signal throttling in error text
const RATE_LIMIT_SIGNALS: &[&str] = &[
    "429",
    "too many requests",
    "blocked",
    "unusual traffic",
    "rate limit",
];

impl FailureCause {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::RateLimited,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("attempt timed out after {}ms", limit.as_millis()),
        }
    }

    /// Rate-limited proxies cool down; everything else is dead for the run
    pub fn is_rate_limit(&self) -> bool {
        self.kind == FailureKind::RateLimited
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_SIGNALS.iter().any(|signal| lower.contains(signal))
}

/// Result of one unit of work through one proxy
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Success(T),
    EmptyResult(EmptyReason),
    TransientFailure(FailureCause),
}

/// What a retry strategy hands back for one target
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Data(T),
    Empty(EmptyReason),
}

impl<T> Fetched<T> {
    /// Terminal status for empty results, `None` when data was obtained
    pub fn status(&self) -> Option<FetchStatus> {
        match self {
            Fetched::Data(_) => None,
            Fetched::Empty(reason) => Some(FetchStatus::from(*reason)),
        }
    }
}

/// Terminal status codes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchStatus {
    Ok,
    NoData,
    TargetUnavailable,
    RateLimitedAllProxies,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Ok => "OK",
            FetchStatus::NoData => "NO_DATA",
            FetchStatus::TargetUnavailable => "TARGET_UNAVAILABLE",
            FetchStatus::RateLimitedAllProxies => "RATE_LIMITED_ALL_PROXIES",
        }
    }
}

impl From<EmptyReason> for FetchStatus {
    fn from(reason: EmptyReason) -> Self {
        match reason {
            EmptyReason::NoData => FetchStatus::NoData,
            EmptyReason::TargetUnavailable => FetchStatus::TargetUnavailable,
        }
    }
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
