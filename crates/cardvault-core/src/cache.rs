//! Reactive query cache over the synchronized collection set.
//!
//! One cache key covers every collection. Reads serve the local replica while
//! the key is fresh and run a sync otherwise; concurrent refreshes share one
//! in-flight sync.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::events::CollectionEvents;
use crate::models::{Collection, CollectionId};
use crate::state::{ReplicaState, SyncState};
use crate::sync::{CollectionService, SyncClient, SyncReport};
use crate::{Error, Result};

type FlightOutcome = std::result::Result<SyncReport, String>;

/// Removed ids kept for `collection_state`; older ones report `Unknown`
const MAX_REMEMBERED_DELETIONS: usize = 256;

/// How long a completed sync keeps the cache key fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleTime {
    /// Only an explicit invalidation triggers a resync
    #[default]
    Never,
    After(Duration),
}

struct CacheState {
    fetched_at: Option<Instant>,
    invalidated: bool,
    /// Bumped on every invalidation so a flight can tell whether one landed mid-sync
    epoch: u64,
    sync_state: SyncState,
    /// Ids the service removed, oldest first
    deleted: VecDeque<CollectionId>,
    in_flight: bool,
    waiters: Vec<oneshot::Sender<FlightOutcome>>,
}

impl CacheState {
    fn is_fresh(&self, stale_time: StaleTime) -> bool {
        if self.invalidated {
            return false;
        }
        match (self.fetched_at, stale_time) {
            (None, _) => false,
            (Some(_), StaleTime::Never) => true,
            (Some(fetched_at), StaleTime::After(ttl)) => fetched_at.elapsed() < ttl,
        }
    }

    fn record_round(&mut self, report: &SyncReport) {
        self.deleted.retain(|id| !report.upserted.contains(id));
        for id in &report.removed {
            if self.deleted.contains(id) {
                continue;
            }
            if self.deleted.len() == MAX_REMEMBERED_DELETIONS {
                self.deleted.pop_front();
            }
            self.deleted.push_back(*id);
        }
    }
}

struct Inner<S> {
    client: SyncClient<S>,
    stale_time: StaleTime,
    state: Mutex<CacheState>,
}

impl<S: CollectionService> Inner<S> {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_flight(&self, epoch: u64) {
        let outcome = self.client.sync().await;

        let waiters = {
            let mut state = self.lock_state();
            state.in_flight = false;
            match &outcome {
                Ok(report) => {
                    state.fetched_at = Some(Instant::now());
                    if state.epoch == epoch {
                        state.invalidated = false;
                    } else {
                        tracing::debug!("Invalidated during sync; cache stays stale");
                    }
                    state.record_round(report);
                    state.sync_state = SyncState::Synced;
                }
                Err(error) => {
                    tracing::warn!("Collection sync failed: {error}");
                    state.sync_state = SyncState::Error;
                }
            }
            std::mem::take(&mut state.waiters)
        };

        let shared: FlightOutcome = outcome.map_err(|error| error.to_string());
        for waiter in waiters {
            let _ = waiter.send(shared.clone());
        }
    }
}

/// Cached, deduplicated, invalidatable view of every synchronized collection.
pub struct CollectionsQuery<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for CollectionsQuery<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CollectionService> CollectionsQuery<S> {
    pub fn new(client: SyncClient<S>, stale_time: StaleTime) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                stale_time,
                state: Mutex::new(CacheState {
                    fetched_at: None,
                    invalidated: false,
                    epoch: 0,
                    sync_state: SyncState::Idle,
                    deleted: VecDeque::new(),
                    in_flight: false,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    pub fn client(&self) -> &SyncClient<S> {
        &self.inner.client
    }

    /// Every locally held collection, syncing first unless the key is fresh.
    pub async fn read(&self) -> Result<Vec<Collection>> {
        if !self.is_fresh() {
            self.refresh().await?;
        }
        self.inner.client.replica().list_collections().await
    }

    /// Sync now, joining a sync that is already in flight.
    pub async fn refresh(&self) -> Result<SyncReport> {
        let (sender, receiver) = oneshot::channel();
        let start_epoch = {
            let mut state = self.inner.lock_state();
            state.waiters.push(sender);
            if state.in_flight {
                None
            } else {
                state.in_flight = true;
                state.sync_state = SyncState::Syncing;
                Some(state.epoch)
            }
        };

        if let Some(epoch) = start_epoch {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_flight(epoch).await });
        } else {
            tracing::debug!("Joining in-flight collection sync");
        }

        receiver
            .await
            .map_err(|_| Error::SyncFailed("sync task ended without a result".to_string()))?
            .map_err(Error::SyncFailed)
    }

    /// Mark the cache key stale; the next read resyncs.
    pub fn invalidate(&self) {
        let mut state = self.inner.lock_state();
        state.invalidated = true;
        state.epoch = state.epoch.wrapping_add(1);
        tracing::debug!("Collections query invalidated");
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.inner.lock_state().is_fresh(self.inner.stale_time)
    }

    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.inner.lock_state().sync_state
    }

    /// Where one collection stands relative to the last sync.
    pub async fn collection_state(&self, id: &CollectionId) -> Result<ReplicaState> {
        let (fresh, deleted) = {
            let state = self.inner.lock_state();
            (
                state.is_fresh(self.inner.stale_time),
                state.deleted.contains(id),
            )
        };

        let replica = self.inner.client.replica();
        let claimed = replica
            .list_sync_claims()
            .await?
            .iter()
            .any(|item| item.collection_id == *id && item.last_updated_at.is_some());

        if claimed {
            return Ok(if fresh {
                ReplicaState::Synced
            } else {
                ReplicaState::PossiblyStale
            });
        }
        if replica.get_collection(id).await?.is_some() {
            return Ok(ReplicaState::PossiblyStale);
        }
        Ok(if deleted {
            ReplicaState::Deleted
        } else {
            ReplicaState::Unknown
        })
    }

    /// Invalidate on every collection event and resync once events go quiet
    /// for `debounce`.
    pub fn spawn_resync_listener(
        &self,
        events: &CollectionEvents,
        debounce: Duration,
    ) -> JoinHandle<()> {
        let mut receiver = events.subscribe();
        let query = self.clone();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                query.invalidate();

                let closed = loop {
                    match tokio::time::timeout(debounce, receiver.recv()).await {
                        Err(_) => break false,
                        Ok(Ok(_) | Err(broadcast::error::RecvError::Lagged(_))) => {
                            query.invalidate();
                        }
                        Ok(Err(broadcast::error::RecvError::Closed)) => break true,
                    }
                };

                if let Err(error) = query.refresh().await {
                    tracing::warn!("Resync after collection change failed: {error}");
                }
                if closed {
                    break;
                }
            }
            tracing::debug!("Collection event bus closed; resync listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::OptimisticWrite;
    use crate::events::{ChangeCause, CollectionSetChanged};
    use crate::models::{CollectionCard, SyncResponse};
    use crate::services::ReplicaService;
    use crate::sync::testing::{cards_map, ScriptedService};
    use pretty_assertions::assert_eq;

    async fn query_with(
        service: ScriptedService,
        stale_time: StaleTime,
    ) -> (CollectionsQuery<ScriptedService>, Arc<ScriptedService>) {
        let service = Arc::new(service);
        let replica = ReplicaService::open_in_memory().await.unwrap();
        let client = SyncClient::new(Arc::clone(&service), replica);
        (CollectionsQuery::new(client, stale_time), service)
    }

    fn response_with(collection: &Collection) -> SyncResponse {
        SyncResponse {
            collections: vec![collection.clone()],
            collection_cards_map: cards_map(&[(
                collection,
                vec![CollectionCard::new(collection.id, "card-1", "v1", 1)],
            )]),
            removed_collections: Vec::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_reads_do_not_resync() {
        let a = Collection::new("alice", "A");
        let service = ScriptedService::new();
        service.push_response(response_with(&a));
        let (query, service) = query_with(service, StaleTime::Never).await;

        assert_eq!(query.read().await.unwrap(), vec![a.clone()]);
        assert_eq!(query.read().await.unwrap(), vec![a]);
        assert_eq!(service.bulk_calls(), 1);
        assert_eq!(query.sync_state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_reads_share_one_sync() {
        let a = Collection::new("alice", "A");
        let service = ScriptedService::new().with_delay(Duration::from_millis(100));
        service.push_response(response_with(&a));
        let (query, service) = query_with(service, StaleTime::Never).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let query = query.clone();
            handles.push(tokio::spawn(async move { query.read().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec![a.clone()]);
        }
        assert_eq!(service.bulk_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalidate_forces_next_read_to_sync() {
        let (query, service) = query_with(ScriptedService::new(), StaleTime::Never).await;

        query.read().await.unwrap();
        query.invalidate();
        assert!(!query.is_fresh());
        query.read().await.unwrap();

        assert_eq!(service.bulk_calls(), 2);
        assert!(query.is_fresh());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalidation_during_flight_keeps_key_stale() {
        let service = ScriptedService::new().with_delay(Duration::from_millis(150));
        let (query, service) = query_with(service, StaleTime::Never).await;

        let pending = query.clone();
        let flight = tokio::spawn(async move { pending.refresh().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        query.invalidate();
        flight.await.unwrap().unwrap();

        assert!(!query.is_fresh());
        query.read().await.unwrap();
        assert_eq!(service.bulk_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_time_expires_the_key() {
        let (query, service) =
            query_with(ScriptedService::new(), StaleTime::After(Duration::from_millis(50))).await;

        query.read().await.unwrap();
        assert!(query.is_fresh());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!query.is_fresh());
        query.read().await.unwrap();
        assert_eq!(service.bulk_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_sync_reaches_every_waiter() {
        let service = ScriptedService::new().with_delay(Duration::from_millis(100));
        service.push_error(Error::Api {
            status: 500,
            message: "boom".to_string(),
        });
        let (query, service) = query_with(service, StaleTime::Never).await;

        let first = query.clone();
        let second = query.clone();
        let (a, b) = tokio::join!(first.refresh(), second.refresh());

        assert!(a.unwrap_err().to_string().contains("boom"));
        assert!(b.unwrap_err().to_string().contains("boom"));
        assert_eq!(service.bulk_calls(), 1);
        assert_eq!(query.sync_state(), SyncState::Error);
        assert!(!query.is_fresh());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collection_state_follows_sync_lifecycle() {
        let a = Collection::new("alice", "A");
        let service = ScriptedService::new();
        service.push_response(response_with(&a));
        service.push_response(SyncResponse {
            removed_collections: vec![a.id],
            ..SyncResponse::default()
        });
        let (query, _service) = query_with(service, StaleTime::Never).await;

        assert_eq!(
            query.collection_state(&a.id).await.unwrap(),
            ReplicaState::Unknown
        );
        query.read().await.unwrap();
        assert_eq!(
            query.collection_state(&a.id).await.unwrap(),
            ReplicaState::Synced
        );
        query.invalidate();
        assert_eq!(
            query.collection_state(&a.id).await.unwrap(),
            ReplicaState::PossiblyStale
        );
        query.read().await.unwrap();
        assert_eq!(
            query.collection_state(&a.id).await.unwrap(),
            ReplicaState::Deleted
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn optimistic_only_rows_are_possibly_stale() {
        let (query, _service) = query_with(ScriptedService::new(), StaleTime::Never).await;
        query.read().await.unwrap();

        let local = Collection::new("alice", "Local only");
        query
            .client()
            .replica()
            .apply_optimistic(&[OptimisticWrite::UpsertCollection(local.clone())])
            .await
            .unwrap();

        assert!(query.is_fresh());
        assert_eq!(
            query.collection_state(&local.id).await.unwrap(),
            ReplicaState::PossiblyStale
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remembered_deletions_are_bounded() {
        let removed: Vec<CollectionId> = (0..MAX_REMEMBERED_DELETIONS + 10)
            .map(|_| CollectionId::new())
            .collect();
        let service = ScriptedService::new();
        service.push_response(SyncResponse {
            removed_collections: removed.clone(),
            ..SyncResponse::default()
        });
        let (query, _service) = query_with(service, StaleTime::Never).await;
        query.read().await.unwrap();

        assert_eq!(
            query.inner.lock_state().deleted.len(),
            MAX_REMEMBERED_DELETIONS
        );
        assert_eq!(
            query.collection_state(&removed[0]).await.unwrap(),
            ReplicaState::Unknown
        );
        assert_eq!(
            query.collection_state(&removed[removed.len() - 1]).await.unwrap(),
            ReplicaState::Deleted
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn listener_debounces_bursts_into_one_resync() {
        let (query, service) = query_with(ScriptedService::new(), StaleTime::Never).await;
        query.read().await.unwrap();

        let events = CollectionEvents::default();
        let listener = query.spawn_resync_listener(&events, Duration::from_millis(50));
        let id = CollectionId::new();
        for _ in 0..3 {
            events.publish(CollectionSetChanged::new(id, ChangeCause::CardsChanged));
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(service.bulk_calls(), 2);
        assert!(query.is_fresh());

        drop(events);
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
