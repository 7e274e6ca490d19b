//! Bulk-sync wire types

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, CollectionCard, CollectionId};

/// The client's claim of what it already holds for one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestItem {
    pub collection_id: CollectionId,
    /// `None` means "I have nothing trustworthy for this id"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Body of `POST /collections/bulk-sync`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub collections: Vec<SyncRequestItem>,
}

/// Delta returned by the collection service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Full records for stale or missing collections
    #[serde(default)]
    pub collections: Vec<Collection>,
    /// Full card sets, each replacing the local set for that collection
    #[serde(default)]
    pub collection_cards_map: BTreeMap<CollectionId, Vec<CollectionCard>>,
    /// Ids the client must drop
    #[serde(default)]
    pub removed_collections: Vec<CollectionId>,
}

impl SyncResponse {
    /// Whether the response carries no changes at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
            && self.collection_cards_map.is_empty()
            && self.removed_collections.is_empty()
    }

    /// Ids listed both as upserted and removed
    #[must_use]
    pub fn overlapping_ids(&self) -> Vec<CollectionId> {
        let removed: BTreeSet<_> = self.removed_collections.iter().collect();
        let mut overlap = self
            .collections
            .iter()
            .map(|collection| collection.id)
            .filter(|id| removed.contains(id))
            .collect::<Vec<_>>();
        overlap.sort();
        overlap.dedup();
        overlap
    }
}
