//! One bulk-sync round trip between the local replica and the collection service.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use super::CollectionService;
use crate::models::{CollectionId, SyncRequest, SyncRequestItem};
use crate::services::ReplicaService;
use crate::{Error, Result};

/// What a completed sync changed locally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Freshness claims sent, including tracked ids without a timestamp
    pub claims_sent: usize,
    /// Collections written from the response
    pub upserted: Vec<CollectionId>,
    /// Card sets replaced wholesale
    pub card_sets_replaced: usize,
    /// Ids the service told us to drop
    pub removed: Vec<CollectionId>,
    /// Card sets dropped because their collection is not held locally
    pub skipped_card_sets: usize,
    /// Ids the service listed as both changed and removed
    pub overlapping: Vec<CollectionId>,
    /// Wall time of the round trip and apply
    pub duration_ms: u64,
}

impl SyncReport {
    /// Whether the response carried no changes
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty() && self.card_sets_replaced == 0
    }
}

/// Runs bulk-sync rounds against a [`CollectionService`].
pub struct SyncClient<S> {
    service: Arc<S>,
    replica: ReplicaService,
    tracked: Arc<Mutex<BTreeSet<CollectionId>>>,
}

impl<S> Clone for SyncClient<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            replica: self.replica.clone(),
            tracked: Arc::clone(&self.tracked),
        }
    }
}

impl<S: CollectionService> SyncClient<S> {
    pub fn new(service: Arc<S>, replica: ReplicaService) -> Self {
        Self {
            service,
            replica,
            tracked: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub const fn replica(&self) -> &ReplicaService {
        &self.replica
    }

    /// Ask for a collection not yet held locally (e.g. another user's public
    /// collection) on the next sync.
    pub async fn track(&self, id: CollectionId) {
        self.tracked.lock().await.insert(id);
    }

    /// Build the request for the next sync: every local claim plus tracked ids.
    pub async fn build_request(&self) -> Result<SyncRequest> {
        let mut collections = self.replica.list_sync_claims().await?;
        let claimed: BTreeSet<CollectionId> =
            collections.iter().map(|item| item.collection_id).collect();

        let tracked = self.tracked.lock().await;
        collections.extend(
            tracked
                .iter()
                .filter(|id| !claimed.contains(id))
                .map(|id| SyncRequestItem {
                    collection_id: *id,
                    last_updated_at: None,
                }),
        );

        Ok(SyncRequest { collections })
    }

    /// Run one sync round.
    ///
    /// The round trip runs on its own task: once the request is issued, the
    /// response is applied even if the caller stops waiting.
    pub async fn sync(&self) -> Result<SyncReport> {
        let client = self.clone();
        tokio::spawn(async move { client.run_round().await })
            .await
            .map_err(|error| Error::SyncFailed(format!("sync task aborted: {error}")))?
    }

    async fn run_round(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let request = self.build_request().await?;
        tracing::debug!("Starting sync with {} claims", request.collections.len());

        let response = self
            .service
            .bulk_sync(&request)
            .await
            .inspect_err(|error| tracing::warn!("Bulk sync request failed: {error}"))?;

        let applied = self.replica.apply_sync_response(&response).await?;
        self.forget_tracked(&request).await;

        let report = SyncReport {
            claims_sent: request.collections.len(),
            upserted: response.collections.iter().map(|c| c.id).collect(),
            card_sets_replaced: applied.card_sets_replaced,
            removed: response.removed_collections.clone(),
            skipped_card_sets: applied.skipped_card_sets,
            overlapping: applied.overlapping,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        tracing::info!(
            "Sync complete: {} upserted, {} card sets replaced, {} removed in {}ms",
            report.upserted.len(),
            report.card_sets_replaced,
            report.removed.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Tracked ids are one-shot: once answered they are either held locally
    /// (and claimed from then on) or were refused.
    async fn forget_tracked(&self, request: &SyncRequest) {
        let mut tracked = self.tracked.lock().await;
        for item in &request.collections {
            if item.last_updated_at.is_none() {
                tracked.remove(&item.collection_id);
            }
        }
    }
}
