//! Collection mutations: remote first, then an optimistic local write, then
//! the change event that makes the query cache resync.

use std::sync::Arc;

use crate::db::OptimisticWrite;
use crate::events::{ChangeCause, CollectionEvents, CollectionSetChanged, Committed};
use crate::models::{Collection, CollectionCard, CollectionDraft, CollectionId};
use crate::services::ReplicaService;
use crate::sync::CollectionService;
use crate::Result;

/// Issues mutations against the collection service and mirrors them locally.
pub struct MutationClient<S> {
    service: Arc<S>,
    replica: ReplicaService,
    events: CollectionEvents,
}

impl<S> Clone for MutationClient<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            replica: self.replica.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: CollectionService> MutationClient<S> {
    pub const fn new(service: Arc<S>, replica: ReplicaService, events: CollectionEvents) -> Self {
        Self {
            service,
            replica,
            events,
        }
    }

    pub const fn events(&self) -> &CollectionEvents {
        &self.events
    }

    pub async fn create_collection(&self, draft: &CollectionDraft) -> Result<Collection> {
        draft.validate()?;
        let created = self.service.create_collection(draft).await?;
        let change = CollectionSetChanged::new(created.id, ChangeCause::Created);
        let writes = [OptimisticWrite::UpsertCollection(created.clone())];
        self.finish(Committed::new(created, change), &writes).await
    }

    pub async fn update_collection(
        &self,
        id: &CollectionId,
        draft: &CollectionDraft,
    ) -> Result<Collection> {
        draft.validate()?;
        let updated = self.service.update_collection(id, draft).await?;
        let change = CollectionSetChanged::new(updated.id, ChangeCause::Updated);
        let writes = [OptimisticWrite::UpsertCollection(updated.clone())];
        self.finish(Committed::new(updated, change), &writes).await
    }

    pub async fn delete_collection(&self, id: &CollectionId) -> Result<()> {
        self.service.delete_collection(id).await?;
        let change = CollectionSetChanged::new(*id, ChangeCause::Deleted);
        let writes = [OptimisticWrite::DeleteCollection(*id)];
        self.finish(Committed::new((), change), &writes).await
    }

    /// Set one card entry; an amount of 0 removes it.
    ///
    /// The collection record returned by the service (with its bumped
    /// `updated_at`) is written together with the card entry.
    pub async fn set_card(&self, card: &CollectionCard) -> Result<Collection> {
        let collection = self.service.set_card(card).await?;
        let change = CollectionSetChanged::new(card.collection_id, ChangeCause::CardsChanged);
        let writes = [
            OptimisticWrite::UpsertCollection(collection.clone()),
            OptimisticWrite::SetCard(card.clone()),
        ];
        self.finish(Committed::new(collection, change), &writes).await
    }

    /// Mirror an accepted mutation locally, then release it through the event
    /// bus. The event goes out even when the local write fails, since the
    /// server state already changed.
    async fn finish<T>(&self, committed: Committed<T>, writes: &[OptimisticWrite]) -> Result<T> {
        let local = self.replica.apply_optimistic(writes).await;
        if let Err(error) = &local {
            tracing::warn!("Optimistic write failed; next sync will reconcile: {error}");
        }
        let value = committed.publish(&self.events);
        local?;
        Ok(value)
    }
}
