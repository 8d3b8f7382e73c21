use thiserror::Error;

use crate::models::FetchStatus;

/// Unified error type for the fetch client
#[derive(Error, Debug)]
pub enum RotaError {
    // Proxy errors
    #[error("No proxies configured")]
    NoProxiesAvailable,

    #[error("All proxies exhausted after {attempts} attempts")]
    AllProxiesExhausted { attempts: u32 },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Target errors
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    // Run control
    #[error("Operation cancelled")]
    Cancelled,

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Rota operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// Terminal status code reported to callers, if this error carries one
    pub fn status(&self) -> Option<FetchStatus> {
        match self {
            RotaError::AllProxiesExhausted { .. } => Some(FetchStatus::RateLimitedAllProxies),
            _ => None,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            RotaError::Cancelled => 130,

            RotaError::InvalidConfig(_)
            | RotaError::InvalidProxyAddress(_)
            | RotaError::UnsupportedProtocol(_)
            | RotaError::NoProxiesAvailable => 2,

            RotaError::AllProxiesExhausted { .. }
            | RotaError::InvalidTarget(_)
            | RotaError::Http(_)
            | RotaError::Io(_)
            | RotaError::Json(_)
            | RotaError::Internal(_) => 1,
        }
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidProxyAddress(err.to_string())
    }
}
