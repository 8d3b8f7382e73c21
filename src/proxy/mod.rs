//! Proxy rotation machinery
//!
//! This module provides:
//! - Per-run proxy health tracking with rate-limit cooldowns
//! - An ordered pool with a pinned "last known good" proxy
//! - Sequential and racing retry strategies
//! - A start-of-run probe

pub mod health;
pub mod pool;
pub mod probe;
pub mod strategy;

pub use health::{ProxyHealthRegistry, DEFAULT_RATE_LIMIT_COOLDOWN};
pub use pool::ProxyPool;
pub use probe::{ProbeConfig, ProbeSummary, ProbeVerdict, ProxyProber};
pub use strategy::{RacingStrategy, RetrySettings, SequentialStrategy, StrategyKind};
