//! Upstream operations
//!
//! An [`UpstreamOperation`] is one unit of work performed through one proxy.
//! It never picks proxies itself; it only reports what happened as a
//! [`RetryOutcome`], and the retry strategies decide what to do next.

pub mod http;
pub mod youtube;

pub use youtube::{
    ListingOperation, MetadataOperation, PlaylistEntry, PlaylistListing, ProbeOperation,
    TranscriptOperation, VideoMetadata, YoutubeApi,
};

use std::future::Future;

use async_trait::async_trait;

use crate::models::{Proxy, RetryOutcome};

/// Kinds of work the client performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Transcript,
    Metadata,
    Listing,
    Probe,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Transcript => "transcript",
            OperationKind::Metadata => "metadata",
            OperationKind::Listing => "listing",
            OperationKind::Probe => "probe",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Contract every upstream call satisfies.
///
/// - Target-side emptiness (no captions, private, removed) is `EmptyResult`.
/// - Throttling is `TransientFailure` with `FailureKind::RateLimited`.
/// - Everything proxy-side (refused, DNS, handshake) is `TransientFailure`
///   with a network kind.
///
/// Strategies enforce the per-attempt deadline, so implementations may block
/// for as long as the transport lets them.
#[async_trait]
pub trait UpstreamOperation: Send + Sync {
    type Output: Send + 'static;

    fn kind(&self) -> OperationKind;

    async fn attempt(&self, target: &str, proxy: &Proxy) -> RetryOutcome<Self::Output>;
}

/// Adapts a closure into an [`UpstreamOperation`]
pub struct FnOperation<F> {
    kind: OperationKind,
    f: F,
}

impl<F> FnOperation<F> {
    pub fn new(kind: OperationKind, f: F) -> Self {
        Self { kind, f }
    }
}

#[async_trait]
impl<F, Fut, T> UpstreamOperation for FnOperation<F>
where
    F: Fn(String, Proxy) -> Fut + Send + Sync,
    Fut: Future<Output = RetryOutcome<T>> + Send,
    T: Send + 'static,
{
    type Output = T;

    fn kind(&self) -> OperationKind {
        self.kind
    }

    async fn attempt(&self, target: &str, proxy: &Proxy) -> RetryOutcome<T> {
        (self.f)(target.to_string(), proxy.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmptyReason;

    #[tokio::test]
    async fn test_fn_operation_passes_target_and_proxy() {
        let op = FnOperation::new(OperationKind::Metadata, |target: String, proxy: Proxy| async move {
            if proxy.port() == 8081 {
                RetryOutcome::Success(format!("{}@{}", target, proxy.address()))
            } else {
                RetryOutcome::EmptyResult(EmptyReason::NoData)
            }
        });

        assert_eq!(op.kind(), OperationKind::Metadata);
        assert_eq!(
            op.attempt("abc", &Proxy::new("127.0.0.1", 8081)).await,
            RetryOutcome::Success("abc@127.0.0.1:8081".to_string())
        );
        assert_eq!(
            op.attempt("abc", &Proxy::new("127.0.0.1", 8082)).await,
            RetryOutcome::EmptyResult(EmptyReason::NoData)
        );
    }

    #[test]
    fn test_operation_kind_names() {
        assert_eq!(OperationKind::Transcript.as_str(), "transcript");
        assert_eq!(OperationKind::Listing.to_string(), "listing");
    }
}
