//! In-memory authoritative collection state and bulk-sync delta computation.

use std::collections::{BTreeMap, BTreeSet};

use cardvault_core::models::{
    Collection, CollectionCard, CollectionDraft, CollectionId, SyncRequest, SyncResponse,
};
use cardvault_core::util::now_millis;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::AppError;

#[derive(Default)]
struct StoreState {
    collections: BTreeMap<CollectionId, Collection>,
    cards: BTreeMap<CollectionId, Vec<CollectionCard>>,
    last_stamp: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Strictly increasing millisecond timestamps, even within one millisecond.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = now_millis();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn owned(&self, id: &CollectionId, user_id: &str) -> Result<&Collection, AppError> {
        let collection = self
            .collections
            .get(id)
            .filter(|collection| collection.is_visible_to(user_id))
            .ok_or_else(|| AppError::not_found(format!("collection {id} does not exist")))?;
        if !collection.is_owned_by(user_id) {
            return Err(AppError::forbidden(format!(
                "collection {id} belongs to another user"
            )));
        }
        Ok(collection)
    }

    fn touch(&mut self, id: &CollectionId) -> Option<Collection> {
        let stamp = self.next_stamp();
        let collection = self.collections.get_mut(id)?;
        collection.updated_at = stamp;
        Some(collection.clone())
    }
}

/// Authoritative collections for every user.
#[derive(Default)]
pub struct CollectionStore {
    state: RwLock<StoreState>,
}

impl CollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a client's claims against authoritative state.
    ///
    /// The visible set is every collection the user owns plus any public
    /// collection they claim. Changed or unclaimed visible collections come
    /// back in full; claimed ids outside the visible set are listed as removed.
    pub async fn bulk_sync(&self, user_id: &str, request: &SyncRequest) -> SyncResponse {
        let state = self.state.read().await;

        let claims: BTreeMap<CollectionId, Option<DateTime<Utc>>> = request
            .collections
            .iter()
            .map(|item| (item.collection_id, item.last_updated_at))
            .collect();

        let mut changed: BTreeSet<CollectionId> = BTreeSet::new();
        let mut removed_collections = Vec::new();

        for (id, claimed_at) in &claims {
            match state.collections.get(id) {
                Some(collection) if collection.is_visible_to(user_id) => {
                    if *claimed_at != Some(collection.updated_at) {
                        changed.insert(*id);
                    }
                }
                _ => removed_collections.push(*id),
            }
        }

        changed.extend(
            state
                .collections
                .values()
                .filter(|collection| {
                    collection.is_owned_by(user_id) && !claims.contains_key(&collection.id)
                })
                .map(|collection| collection.id),
        );

        let collections: Vec<Collection> = changed
            .iter()
            .filter_map(|id| state.collections.get(id).cloned())
            .collect();
        let collection_cards_map = changed
            .iter()
            .map(|id| (*id, state.cards.get(id).cloned().unwrap_or_default()))
            .collect();

        tracing::debug!(
            claims = claims.len(),
            changed = collections.len(),
            removed = removed_collections.len(),
            "Computed bulk sync delta"
        );

        SyncResponse {
            collections,
            collection_cards_map,
            removed_collections,
        }
    }

    pub async fn create_collection(
        &self,
        user_id: &str,
        draft: &CollectionDraft,
    ) -> Result<Collection, AppError> {
        validate_draft(draft)?;
        let mut state = self.state.write().await;
        let collection = Collection {
            id: CollectionId::new(),
            title: draft.title.trim().to_string(),
            description: draft.description.clone(),
            owner_id: user_id.to_string(),
            wantlist: draft.wantlist,
            public: draft.public,
            collection_type: draft.collection_type,
            updated_at: state.next_stamp(),
        };
        state.cards.insert(collection.id, Vec::new());
        state.collections.insert(collection.id, collection.clone());
        Ok(collection)
    }

    pub async fn update_collection(
        &self,
        user_id: &str,
        id: &CollectionId,
        draft: &CollectionDraft,
    ) -> Result<Collection, AppError> {
        validate_draft(draft)?;
        let mut state = self.state.write().await;
        state.owned(id, user_id)?;
        let stamp = state.next_stamp();

        let collection = state
            .collections
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("collection {id} does not exist")))?;
        collection.title = draft.title.trim().to_string();
        collection.description.clone_from(&draft.description);
        collection.wantlist = draft.wantlist;
        collection.public = draft.public;
        collection.collection_type = draft.collection_type;
        collection.updated_at = stamp;
        Ok(collection.clone())
    }

    pub async fn delete_collection(
        &self,
        user_id: &str,
        id: &CollectionId,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.owned(id, user_id)?;
        state.collections.remove(id);
        state.cards.remove(id);
        Ok(())
    }

    /// Insert, overwrite, or (amount 0) remove one card entry.
    pub async fn set_card(
        &self,
        user_id: &str,
        card: &CollectionCard,
    ) -> Result<Collection, AppError> {
        if card.card_id.trim().is_empty() || card.variant_id.trim().is_empty() {
            return Err(AppError::bad_request("cardId and variantId are required"));
        }

        let mut state = self.state.write().await;
        let wantlist = state.owned(&card.collection_id, user_id)?.wantlist;
        if card.amount < 0 && !wantlist {
            return Err(AppError::bad_request(
                "negative amounts are only allowed in wantlists",
            ));
        }

        let cards = state.cards.entry(card.collection_id).or_default();
        cards.retain(|existing| !existing.same_entry(card));
        if card.amount != 0 {
            cards.push(card.clone());
        }

        state
            .touch(&card.collection_id)
            .ok_or_else(|| AppError::Internal("collection vanished during update".to_string()))
    }
}

fn validate_draft(draft: &CollectionDraft) -> Result<(), AppError> {
    draft
        .validate()
        .map_err(|error| AppError::bad_request(error.to_string()))
}
