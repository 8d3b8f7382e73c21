//! HTTP plumbing shared by the upstream operations
//!
//! Builds per-proxy `reqwest` clients and maps HTTP statuses and transport
//! errors onto the retry outcome taxonomy.

use std::error::Error as StdError;
use std::time::Duration;

use reqwest::StatusCode;

use crate::models::{
    is_rate_limit_message, EmptyReason, FailureCause, FailureKind, Proxy, RetryOutcome,
};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Build a client that routes every request through `proxy`
pub fn client_for(
    proxy: &Proxy,
    timeout: Duration,
    user_agent: &str,
) -> Result<reqwest::Client, FailureCause> {
    let upstream = reqwest::Proxy::all(proxy.url())
        .map_err(|e| FailureCause::network(format!("invalid proxy {}: {}", proxy, e)))?;

    reqwest::Client::builder()
        .proxy(upstream)
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| FailureCause::network(format!("failed to build client: {}", e)))
}

/// Map a non-success status to an outcome. `None` means carry on and read
/// the body.
pub fn outcome_for_status<T>(status: StatusCode) -> Option<RetryOutcome<T>> {
    if status.is_success() {
        return None;
    }

    let outcome = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => {
            RetryOutcome::TransientFailure(FailureCause::rate_limited(format!("HTTP {}", status)))
        }
        StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND | StatusCode::GONE => {
            RetryOutcome::EmptyResult(EmptyReason::TargetUnavailable)
        }
        _ => RetryOutcome::TransientFailure(FailureCause::network(format!("HTTP {}", status))),
    };
    Some(outcome)
}

/// Classify a transport error raised while talking through a proxy
pub fn failure_from_error(err: &reqwest::Error) -> FailureCause {
    let message = error_chain(err);

    if err.is_timeout() {
        return FailureCause {
            kind: FailureKind::Timeout,
            message,
        };
    }

    if err.status() == Some(StatusCode::TOO_MANY_REQUESTS) {
        return FailureCause::rate_limited(message);
    }

    if err.is_connect() {
        return FailureCause::network(message);
    }

    // The top-level message embeds the request URL, which may itself contain
    // throttling keywords; classify on the underlying causes only
    let causes = err.source().map(error_chain).unwrap_or_default();
    if is_rate_limit_message(&causes) {
        FailureCause::rate_limited(message)
    } else {
        FailureCause::network(message)
    }
}

/// Flatten an error and its sources into one line
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_status_continues() {
        assert!(outcome_for_status::<()>(StatusCode::OK).is_none());
        assert!(outcome_for_status::<()>(StatusCode::NO_CONTENT).is_none());
    }

    #[test]
    fn test_throttling_statuses_are_rate_limits() {
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::FORBIDDEN] {
            match outcome_for_status::<()>(status) {
                Some(RetryOutcome::TransientFailure(cause)) => assert!(cause.is_rate_limit()),
                other => panic!("unexpected outcome for {}: {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_missing_target_statuses_are_empty() {
        for status in [StatusCode::NOT_FOUND, StatusCode::GONE, StatusCode::UNAUTHORIZED] {
            assert_eq!(
                outcome_for_status::<()>(status),
                Some(RetryOutcome::EmptyResult(EmptyReason::TargetUnavailable))
            );
        }
    }

    #[test]
    fn test_proxy_side_statuses_are_network_failures() {
        for status in [
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            StatusCode::BAD_GATEWAY,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            match outcome_for_status::<()>(status) {
                Some(RetryOutcome::TransientFailure(cause)) => {
                    assert_eq!(cause.kind, FailureKind::Network)
                }
                other => panic!("unexpected outcome for {}: {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_client_for_accepts_supported_schemes() {
        let timeout = Duration::from_secs(5);
        assert!(client_for(&Proxy::new("127.0.0.1", 8080), timeout, DEFAULT_USER_AGENT).is_ok());
        let socks = Proxy::parse("socks5://user:pw@127.0.0.1:1080").unwrap();
        assert!(client_for(&socks, timeout, DEFAULT_USER_AGENT).is_ok());
    }
}
