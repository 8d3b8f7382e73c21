//! rota-fetch - Proxy-rotating resilient fetch client
//!
//! Runs requests against a rate-limiting upstream through a pool of proxies,
//! learning per run which proxies are dead or cooling down.
//!
//! ## Features
//!
//! - Sequential strategy that sticks with the last working proxy
//! - Racing strategy that fires a batch of proxies and takes the first answer
//! - Rate-limit cooldowns kept apart from permanent proxy failures
//! - HTTP, HTTPS and SOCKS5 proxies with optional credentials
//! - YouTube caption, metadata and playlist operations
//! - Resumable batch runner writing JSON lines results

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod services;
pub mod upstream;

pub use client::{FetchClient, ShutdownHandle};
pub use config::Config;
pub use error::{Result, RotaError};
