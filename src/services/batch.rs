//! Batch runner
//!
//! Walks the discovered targets, pulling metadata and captions for each video
//! through the fetch client and appending the outcome to the result store.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::store::{ItemRecord, ResultStore};
use super::targets::Target;
use crate::client::FetchClient;
use crate::error::{Result, RotaError};
use crate::models::{FetchStatus, Fetched};
use crate::upstream::{
    ListingOperation, MetadataOperation, PlaylistListing, TranscriptOperation, UpstreamOperation,
    VideoMetadata, YoutubeApi,
};

/// The upstream calls a batch needs
#[derive(Clone)]
pub struct BatchOperations {
    pub transcript: Arc<dyn UpstreamOperation<Output = String>>,
    pub metadata: Arc<dyn UpstreamOperation<Output = VideoMetadata>>,
    pub listing: Arc<dyn UpstreamOperation<Output = PlaylistListing>>,
}

impl BatchOperations {
    pub fn youtube(api: Arc<YoutubeApi>) -> Self {
        Self {
            transcript: Arc::new(TranscriptOperation::new(api.clone())),
            metadata: Arc::new(MetadataOperation::new(api.clone())),
            listing: Arc::new(ListingOperation::new(api)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Videos written to the store this run
    pub processed: usize,
    pub succeeded: usize,
    /// Videos stored as `NO_DATA` or `TARGET_UNAVAILABLE`
    pub empty: usize,
    /// Videos already finished in an earlier run
    pub skipped: usize,
    pub playlists: usize,
}

pub struct BatchRunner {
    client: Arc<FetchClient>,
    ops: BatchOperations,
    store: ResultStore,
    item_delay: Duration,
}

impl BatchRunner {
    pub fn new(
        client: Arc<FetchClient>,
        ops: BatchOperations,
        store: ResultStore,
        item_delay: Duration,
    ) -> Self {
        Self {
            client,
            ops,
            store,
            item_delay,
        }
    }

    /// Process every target in order.
    ///
    /// Stops at the first proxy exhaustion (after storing a
    /// `RATE_LIMITED_ALL_PROXIES` record for the video) or on shutdown.
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run(&mut self, targets: &[Target]) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();

        for (index, target) in targets.iter().enumerate() {
            info!("[{}/{}] Processing {}", index + 1, targets.len(), target);

            let result = match target {
                Target::Video(id) => self.process_video(id, &mut summary).await,
                Target::Playlist(id) => self.process_playlist(id, &mut summary).await,
            };
            if let Err(e) = result {
                self.log_stats();
                return Err(e);
            }
        }

        info!(
            "Batch complete: {} processed ({} with captions, {} empty), {} skipped",
            summary.processed, summary.succeeded, summary.empty, summary.skipped
        );
        self.log_stats();
        Ok(summary)
    }

    async fn process_playlist(&mut self, id: &str, summary: &mut BatchSummary) -> Result<()> {
        let listing = match self.client.fetch(&self.ops.listing, id).await? {
            Fetched::Data(listing) => listing,
            Fetched::Empty(reason) => {
                warn!("Playlist {} has nothing to fetch ({:?})", id, reason);
                return Ok(());
            }
        };

        summary.playlists += 1;
        info!(
            "Playlist '{}' has {} videos",
            listing.title,
            listing.videos.len()
        );
        for entry in &listing.videos {
            self.process_video(&entry.id, summary).await?;
        }
        Ok(())
    }

    async fn process_video(&mut self, id: &str, summary: &mut BatchSummary) -> Result<()> {
        if self.store.is_done(id) {
            debug!("Skipping {}, already stored", id);
            summary.skipped += 1;
            return Ok(());
        }

        let metadata = match self.client.fetch(&self.ops.metadata, id).await {
            Ok(Fetched::Data(metadata)) => metadata,
            Ok(Fetched::Empty(reason)) => {
                debug!("No metadata for {} ({:?}), using placeholder", id, reason);
                VideoMetadata::placeholder(id)
            }
            Err(e) => return self.record_failure(&VideoMetadata::placeholder(id), e),
        };

        let record = match self.client.fetch(&self.ops.transcript, id).await {
            Ok(Fetched::Data(text)) => {
                summary.succeeded += 1;
                ItemRecord::new(&metadata, FetchStatus::Ok, Some(text))
            }
            Ok(Fetched::Empty(reason)) => {
                summary.empty += 1;
                ItemRecord::new(&metadata, reason.into(), None)
            }
            Err(e) => return self.record_failure(&metadata, e),
        };

        self.store.append(&record)?;
        summary.processed += 1;
        info!("{} '{}': {}", id, metadata.title, record.status);

        self.pause().await
    }

    /// Store a terminal status for errors that carry one, then hand the error back
    fn record_failure(&mut self, metadata: &VideoMetadata, err: RotaError) -> Result<()> {
        if let Some(status) = err.status() {
            error!("Stopping at {}: {}", metadata.id, err);
            self.store.append(&ItemRecord::new(metadata, status, None))?;
        }
        Err(err)
    }

    async fn pause(&self) -> Result<()> {
        if self.item_delay.is_zero() {
            return Ok(());
        }

        let shutdown = self.client.shutdown_handle();
        tokio::select! {
            _ = tokio::time::sleep(self.item_delay) => Ok(()),
            _ = shutdown.cancelled() => Err(RotaError::Cancelled),
        }
    }

    fn log_stats(&self) {
        let stats = self.client.stats();
        info!(
            working = stats.working_count,
            dead = stats.dead_count,
            rate_limited = stats.rate_limited_count,
            successes = stats.total_successes,
            failures = stats.total_failures,
            "Proxy health: {:.1}% success rate",
            stats.success_rate()
        );
    }
}
