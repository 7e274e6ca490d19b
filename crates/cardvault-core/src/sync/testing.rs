//! Scripted in-process collection service for tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::CollectionService;
use crate::models::{
    Collection, CollectionCard, CollectionDraft, CollectionId, SyncRequest, SyncResponse,
};
use crate::util::now_millis;
use crate::{Error, Result};

pub const OWNER: &str = "alice";

pub fn cards_map(
    collections: &[(&Collection, Vec<CollectionCard>)],
) -> BTreeMap<CollectionId, Vec<CollectionCard>> {
    collections
        .iter()
        .map(|(collection, cards)| (collection.id, cards.clone()))
        .collect()
}

/// Replays queued bulk-sync outcomes (empty responses once drained) and
/// answers mutations from a small in-memory map.
#[derive(Default)]
pub struct ScriptedService {
    responses: Mutex<VecDeque<Result<SyncResponse>>>,
    requests: Mutex<Vec<SyncRequest>>,
    collections: Mutex<BTreeMap<CollectionId, Collection>>,
    bulk_calls: AtomicUsize,
    fail_mutations: AtomicBool,
    delay: Duration,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_response(&self, response: SyncResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: Error) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    fn check_mutation(&self) -> Result<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(Error::Api {
                status: 500,
                message: "mutation rejected".to_string(),
            });
        }
        Ok(())
    }

    fn store(&self, id: CollectionId, draft: &CollectionDraft) -> Collection {
        let collection = Collection {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            owner_id: OWNER.to_string(),
            wantlist: draft.wantlist,
            public: draft.public,
            collection_type: draft.collection_type,
            updated_at: now_millis(),
        };
        self.collections
            .lock()
            .unwrap()
            .insert(id, collection.clone());
        collection
    }
}

impl CollectionService for ScriptedService {
    async fn bulk_sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(SyncResponse::default()))
    }

    async fn create_collection(&self, draft: &CollectionDraft) -> Result<Collection> {
        self.check_mutation()?;
        Ok(self.store(CollectionId::new(), draft))
    }

    async fn update_collection(
        &self,
        id: &CollectionId,
        draft: &CollectionDraft,
    ) -> Result<Collection> {
        self.check_mutation()?;
        Ok(self.store(*id, draft))
    }

    async fn delete_collection(&self, id: &CollectionId) -> Result<()> {
        self.check_mutation()?;
        self.collections.lock().unwrap().remove(id);
        Ok(())
    }

    async fn set_card(&self, card: &CollectionCard) -> Result<Collection> {
        self.check_mutation()?;
        let mut collections = self.collections.lock().unwrap();
        let collection = collections
            .get_mut(&card.collection_id)
            .ok_or_else(|| Error::Api {
                status: 404,
                message: "collection not found".to_string(),
            })?;
        collection.updated_at = now_millis();
        Ok(collection.clone())
    }
}
