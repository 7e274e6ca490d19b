//! Local replica repository implementation

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::models::{
    CardKey, Collection, CollectionCard, CollectionId, SyncRequestItem, SyncResponse,
};
use crate::util::from_millis;
use libsql::{params, Connection, Row, Value};

const COLLECTION_COLUMNS: &str =
    "id, title, description, owner_id, wantlist, public, collection_type, updated_at";

const CARD_COLUMNS: &str =
    "collection_id, card_id, variant_id, foil, condition, language, amount, price, note";

const OWNER_KEY: &str = "owner_id";

/// Counts describing what one applied sync response changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Collection records inserted or overwritten
    pub upserted: usize,
    /// Card sets replaced wholesale
    pub card_sets_replaced: usize,
    /// Collections deleted (ids that were not held locally are not counted)
    pub removed: usize,
    /// Card sets dropped because their collection is not held locally
    pub skipped_card_sets: usize,
    /// Ids listed as both upserted and removed
    pub overlapping: Vec<CollectionId>,
}

/// A targeted local write made ahead of the next sync
#[derive(Debug, Clone, PartialEq)]
pub enum OptimisticWrite {
    /// Overwrite (or create) a collection record
    UpsertCollection(Collection),
    /// Insert or overwrite one card entry; an amount of 0 removes it
    SetCard(CollectionCard),
    /// Remove a collection and its cards
    DeleteCollection(CollectionId),
}

/// Trait for local replica storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ReplicaStore {
    /// List every locally held collection, any owner
    async fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Get one collection by id
    async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>>;

    /// Insert or fully overwrite a collection record by id
    ///
    /// Does not advance the collection's sync claim.
    async fn upsert_collection(&self, collection: &Collection) -> Result<()>;

    /// Replace the whole card set of a collection
    async fn upsert_collection_cards(
        &self,
        collection_id: &CollectionId,
        cards: &[CollectionCard],
    ) -> Result<()>;

    /// Delete a collection and all of its cards; returns whether it existed
    async fn delete_collection(&self, id: &CollectionId) -> Result<bool>;

    /// List the cards of one collection
    async fn list_collection_cards(&self, collection_id: &CollectionId)
        -> Result<Vec<CollectionCard>>;

    /// Freshness claims for the next bulk-sync request
    async fn list_sync_claims(&self) -> Result<Vec<SyncRequestItem>>;

    /// Apply a whole sync response atomically
    async fn apply_sync_response(&self, response: &SyncResponse) -> Result<ApplyReport>;

    /// Apply a group of optimistic writes atomically, in order
    async fn apply_optimistic(&self, writes: &[OptimisticWrite]) -> Result<()>;

    /// Remove every collection, card, and replica metadata entry
    async fn clear(&self) -> Result<()>;

    /// User the replica currently belongs to
    async fn replica_owner(&self) -> Result<Option<String>>;

    /// Record the user the replica belongs to
    async fn set_replica_owner(&self, user_id: &str) -> Result<()>;
}

/// Whether a collection write also records a sync claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    /// The record arrived with its full card set
    Synced,
    /// Keep whatever claim the row already had
    Preserve,
}

/// libSQL implementation of `ReplicaStore`
pub struct LibSqlReplicaStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlReplicaStore<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn begin(&self) -> Result<()> {
        self.conn.execute("BEGIN IMMEDIATE", ()).await?;
        Ok(())
    }

    /// Commit on success, roll back on failure
    async fn finish<T>(&self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                if let Err(e) = self.conn.execute("COMMIT", ()).await {
                    self.conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(error) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                Err(error)
            }
        }
    }

    async fn write_collection(&self, collection: &Collection, freshness: Freshness) -> Result<()> {
        let sql = match freshness {
            Freshness::Synced => {
                "INSERT INTO collections (id, title, description, owner_id, wantlist, public, collection_type, updated_at, synced_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    owner_id = excluded.owner_id,
                    wantlist = excluded.wantlist,
                    public = excluded.public,
                    collection_type = excluded.collection_type,
                    updated_at = excluded.updated_at,
                    synced_at = excluded.synced_at"
            }
            Freshness::Preserve => {
                "INSERT INTO collections (id, title, description, owner_id, wantlist, public, collection_type, updated_at, synced_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    owner_id = excluded.owner_id,
                    wantlist = excluded.wantlist,
                    public = excluded.public,
                    collection_type = excluded.collection_type,
                    updated_at = excluded.updated_at"
            }
        };

        let updated_at = collection.updated_at.timestamp_millis();
        let synced_at = match freshness {
            Freshness::Synced => Value::Integer(updated_at),
            Freshness::Preserve => Value::Null,
        };

        self.conn
            .execute(
                sql,
                params![
                    collection.id.as_str(),
                    collection.title.as_str(),
                    collection.description.as_str(),
                    collection.owner_id.as_str(),
                    i64::from(collection.wantlist),
                    i64::from(collection.public),
                    collection.collection_type.as_str(),
                    updated_at,
                    synced_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn contains_collection(&self, id: &CollectionId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM collections WHERE id = ?)",
                params![id.as_str()],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i32>(0)? != 0,
            None => false,
        })
    }

    async fn write_card(&self, collection_id: &CollectionId, card: &CollectionCard) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO collection_cards (collection_id, card_id, variant_id, foil, condition, language, amount, price, note)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    collection_id.as_str(),
                    card.card_id.as_str(),
                    card.variant_id.as_str(),
                    i64::from(card.foil),
                    card.condition.clone().unwrap_or_default(),
                    card.language.clone().unwrap_or_default(),
                    card.amount,
                    card.price.map_or(Value::Null, Value::Real),
                    card.note.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    async fn remove_card(&self, key: &CardKey) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM collection_cards
                 WHERE collection_id = ? AND card_id = ? AND variant_id = ? AND foil = ?
                   AND condition = ? AND language = ?",
                params![
                    key.collection_id.as_str(),
                    key.card_id.as_str(),
                    key.variant_id.as_str(),
                    i64::from(key.foil),
                    key.condition.clone().unwrap_or_default(),
                    key.language.clone().unwrap_or_default()
                ],
            )
            .await?;
        Ok(())
    }

    async fn replace_cards(
        &self,
        collection_id: &CollectionId,
        cards: &[CollectionCard],
    ) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM collection_cards WHERE collection_id = ?",
                params![collection_id.as_str()],
            )
            .await?;

        for card in cards {
            self.write_card(collection_id, card).await?;
        }
        Ok(())
    }

    async fn remove_collection(&self, id: &CollectionId) -> Result<bool> {
        // Cards go first so the cascade does not depend on the foreign_keys pragma
        self.conn
            .execute(
                "DELETE FROM collection_cards WHERE collection_id = ?",
                params![id.as_str()],
            )
            .await?;
        let rows = self
            .conn
            .execute("DELETE FROM collections WHERE id = ?", params![id.as_str()])
            .await?;
        Ok(rows > 0)
    }

    async fn apply_response_unchecked(&self, response: &SyncResponse) -> Result<ApplyReport> {
        let mut report = ApplyReport {
            overlapping: response.overlapping_ids(),
            ..ApplyReport::default()
        };
        if !report.overlapping.is_empty() {
            tracing::warn!(
                overlapping = report.overlapping.len(),
                "Sync response lists collections as both changed and removed; removal wins"
            );
        }

        for collection in &response.collections {
            let freshness = if response.collection_cards_map.contains_key(&collection.id) {
                Freshness::Synced
            } else {
                tracing::debug!(
                    collection = %collection.id,
                    "Sync response carried no card set; keeping previous claim"
                );
                Freshness::Preserve
            };
            self.write_collection(collection, freshness).await?;
            report.upserted += 1;
        }

        for (collection_id, cards) in &response.collection_cards_map {
            if !self.contains_collection(collection_id).await? {
                tracing::warn!(
                    collection = %collection_id,
                    "Skipping card set for a collection that is not held locally"
                );
                report.skipped_card_sets += 1;
                continue;
            }
            self.replace_cards(collection_id, cards).await?;
            report.card_sets_replaced += 1;
        }

        for collection_id in &response.removed_collections {
            if self.remove_collection(collection_id).await? {
                report.removed += 1;
            }
        }

        Ok(report)
    }

    async fn apply_optimistic_unchecked(&self, write: &OptimisticWrite) -> Result<()> {
        match write {
            OptimisticWrite::UpsertCollection(collection) => {
                self.write_collection(collection, Freshness::Preserve).await
            }
            OptimisticWrite::SetCard(card) => {
                if !self.contains_collection(&card.collection_id).await? {
                    return Err(Error::NotFound(card.collection_id.to_string()));
                }
                if card.amount == 0 {
                    self.remove_card(&card.key()).await
                } else {
                    self.write_card(&card.collection_id, card).await
                }
            }
            OptimisticWrite::DeleteCollection(id) => {
                self.remove_collection(id).await?;
                Ok(())
            }
        }
    }

    /// Parse a collection from a database row
    fn parse_collection(row: &Row) -> Result<Collection> {
        let id: String = row.get(0)?;
        let collection_type: String = row.get(6)?;
        Ok(Collection {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid collection id '{id}'")))?,
            title: row.get(1)?,
            description: row.get(2)?,
            owner_id: row.get(3)?,
            wantlist: row.get::<i64>(4)? != 0,
            public: row.get::<i64>(5)? != 0,
            collection_type: collection_type.parse().map_err(Error::Database)?,
            updated_at: from_millis(row.get(7)?)?,
        })
    }

    /// Parse a card from a database row
    #[allow(clippy::cast_precision_loss)]
    fn parse_card(row: &Row) -> Result<CollectionCard> {
        let collection_id: String = row.get(0)?;
        let price = match row.get_value(7)? {
            Value::Real(price) => Some(price),
            Value::Integer(price) => Some(price as f64),
            _ => None,
        };
        Ok(CollectionCard {
            collection_id: collection_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid collection id '{collection_id}'")))?,
            card_id: row.get(1)?,
            variant_id: row.get(2)?,
            foil: row.get::<i64>(3)? != 0,
            condition: empty_as_none(row.get(4)?),
            language: empty_as_none(row.get(5)?),
            amount: row.get(6)?,
            price,
            note: row.get(8)?,
        })
    }
}

fn empty_as_none(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl ReplicaStore for LibSqlReplicaStore<'_> {
    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {COLLECTION_COLUMNS} FROM collections
                     ORDER BY title COLLATE NOCASE ASC, id ASC"
                ),
                (),
            )
            .await?;

        let mut collections = Vec::new();
        while let Some(row) = rows.next().await? {
            collections.push(Self::parse_collection(&row)?);
        }
        Ok(collections)
    }

    async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_collection(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_collection(&self, collection: &Collection) -> Result<()> {
        self.write_collection(collection, Freshness::Preserve).await
    }

    async fn upsert_collection_cards(
        &self,
        collection_id: &CollectionId,
        cards: &[CollectionCard],
    ) -> Result<()> {
        self.begin().await?;
        let outcome = self.replace_cards(collection_id, cards).await;
        self.finish(outcome).await
    }

    async fn delete_collection(&self, id: &CollectionId) -> Result<bool> {
        self.begin().await?;
        let outcome = self.remove_collection(id).await;
        self.finish(outcome).await
    }

    async fn list_collection_cards(
        &self,
        collection_id: &CollectionId,
    ) -> Result<Vec<CollectionCard>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CARD_COLUMNS} FROM collection_cards
                     WHERE collection_id = ?
                     ORDER BY card_id, variant_id, foil, condition, language"
                ),
                params![collection_id.as_str()],
            )
            .await?;

        let mut cards = Vec::new();
        while let Some(row) = rows.next().await? {
            cards.push(Self::parse_card(&row)?);
        }
        Ok(cards)
    }

    async fn list_sync_claims(&self) -> Result<Vec<SyncRequestItem>> {
        let mut rows = self
            .conn
            .query("SELECT id, synced_at FROM collections ORDER BY id", ())
            .await?;

        let mut claims = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let last_updated_at = match row.get_value(1)? {
                Value::Integer(millis) => Some(from_millis(millis)?),
                _ => None,
            };
            claims.push(SyncRequestItem {
                collection_id: id
                    .parse()
                    .map_err(|_| Error::Database(format!("invalid collection id '{id}'")))?,
                last_updated_at,
            });
        }
        Ok(claims)
    }

    async fn apply_sync_response(&self, response: &SyncResponse) -> Result<ApplyReport> {
        self.begin().await?;
        let outcome = self.apply_response_unchecked(response).await;
        self.finish(outcome).await
    }

    async fn apply_optimistic(&self, writes: &[OptimisticWrite]) -> Result<()> {
        self.begin().await?;
        let outcome: Result<()> = async {
            for write in writes {
                self.apply_optimistic_unchecked(write).await?;
            }
            Ok(())
        }
        .await;
        self.finish(outcome).await
    }

    async fn clear(&self) -> Result<()> {
        self.begin().await?;
        let outcome: Result<()> = async {
            self.conn.execute("DELETE FROM collection_cards", ()).await?;
            self.conn.execute("DELETE FROM collections", ()).await?;
            self.conn.execute("DELETE FROM replica_meta", ()).await?;
            Ok(())
        }
        .await;
        self.finish(outcome).await
    }

    async fn replica_owner(&self) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM replica_meta WHERE key = ?", [OWNER_KEY])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_replica_owner(&self, user_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO replica_meta (key, value) VALUES (?, ?)",
                [OWNER_KEY, user_id],
            )
            .await?;
        Ok(())
    }
}

/// Distinct collection ids referenced by cards but missing from `collections`
///
/// Always empty while the replica is consistent.
pub async fn orphaned_card_collections(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut rows = conn
        .query(
            "SELECT DISTINCT cc.collection_id
             FROM collection_cards cc
             LEFT JOIN collections c ON c.id = cc.collection_id
             WHERE c.id IS NULL",
            (),
        )
        .await?;

    let mut orphans = BTreeSet::new();
    while let Some(row) = rows.next().await? {
        orphans.insert(row.get::<String>(0)?);
    }
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::util::now_millis;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn response_with(collection: &Collection, cards: Vec<CollectionCard>) -> SyncResponse {
        let mut collection_cards_map = BTreeMap::new();
        collection_cards_map.insert(collection.id, cards);
        SyncResponse {
            collections: vec![collection.clone()],
            collection_cards_map,
            removed_collections: Vec::new(),
        }
    }

    async fn snapshot(repo: &LibSqlReplicaStore<'_>) -> Vec<(Collection, Vec<CollectionCard>)> {
        let mut state = Vec::new();
        for collection in repo.list_collections().await.unwrap() {
            let cards = repo.list_collection_cards(&collection.id).await.unwrap();
            state.push((collection, cards));
        }
        state
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_and_get_collection() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        let mut collection = Collection::new("alice", "Commander staples");
        collection.description = "EDH".to_string();
        collection.public = true;
        repo.upsert_collection(&collection).await.unwrap();

        let fetched = repo.get_collection(&collection.id).await.unwrap().unwrap();
        assert_eq!(fetched, collection);

        collection.title = "Renamed".to_string();
        repo.upsert_collection(&collection).await.unwrap();
        let all = repo.list_collections().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Renamed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_cards_replaces_whole_set() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        let collection = Collection::new("alice", "Binder");
        repo.upsert_collection(&collection).await.unwrap();

        let card_a = CollectionCard::new(collection.id, "card-a", "v1", 1);
        let card_b = CollectionCard::new(collection.id, "card-b", "v1", 4);
        repo.upsert_collection_cards(&collection.id, &[card_a.clone(), card_b])
            .await
            .unwrap();
        repo.upsert_collection_cards(&collection.id, std::slice::from_ref(&card_a))
            .await
            .unwrap();

        let cards = repo.list_collection_cards(&collection.id).await.unwrap();
        assert_eq!(cards, vec![card_a]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_card_optional_fields_round_trip() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        let collection = Collection::new("alice", "Graded");
        repo.upsert_collection(&collection).await.unwrap();

        let mut graded = CollectionCard::new(collection.id, "card-a", "v1", 1);
        graded.foil = true;
        graded.condition = Some("NM".to_string());
        graded.language = Some("ja".to_string());
        graded.price = Some(12.5);
        graded.note = "PSA 10".to_string();
        let plain = CollectionCard::new(collection.id, "card-a", "v1", 3);

        repo.upsert_collection_cards(&collection.id, &[graded.clone(), plain.clone()])
            .await
            .unwrap();

        let cards = repo.list_collection_cards(&collection.id).await.unwrap();
        assert_eq!(cards, vec![plain, graded]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_collection_cascades_to_cards() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        let collection = Collection::new("alice", "Doomed");
        repo.upsert_collection(&collection).await.unwrap();
        repo.upsert_collection_cards(
            &collection.id,
            &[CollectionCard::new(collection.id, "card-a", "v1", 1)],
        )
        .await
        .unwrap();

        assert!(repo.delete_collection(&collection.id).await.unwrap());
        assert!(!repo.delete_collection(&collection.id).await.unwrap());
        assert!(repo.get_collection(&collection.id).await.unwrap().is_none());
        assert!(repo
            .list_collection_cards(&collection.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cards_require_a_local_collection() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        let missing = CollectionId::new();

        let result = repo
            .upsert_collection_cards(&missing, &[CollectionCard::new(missing, "card-a", "v1", 1)])
            .await;
        assert!(result.is_err());
        assert!(orphaned_card_collections(db.connection())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_claims_come_only_from_synced_records() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        let synced = Collection::new("alice", "Synced");
        repo.apply_sync_response(&response_with(&synced, Vec::new()))
            .await
            .unwrap();

        let local_only = Collection::new("alice", "Optimistic");
        repo.upsert_collection(&local_only).await.unwrap();

        let claims = repo.list_sync_claims().await.unwrap();
        let by_id: BTreeMap<_, _> = claims
            .into_iter()
            .map(|claim| (claim.collection_id, claim.last_updated_at))
            .collect();
        assert_eq!(by_id[&synced.id], Some(synced.updated_at));
        assert_eq!(by_id[&local_only.id], None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_optimistic_writes_never_advance_claims() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        let collection = Collection::new("alice", "Deck");
        repo.apply_sync_response(&response_with(&collection, Vec::new()))
            .await
            .unwrap();

        let mut edited = collection.clone();
        edited.title = "Deck v2".to_string();
        edited.updated_at = collection.updated_at + Duration::seconds(30);
        repo.apply_optimistic(&[OptimisticWrite::UpsertCollection(edited)])
            .await
            .unwrap();
        repo.apply_optimistic(&[OptimisticWrite::SetCard(CollectionCard::new(
            collection.id,
            "card-a",
            "v1",
            2,
        ))])
        .await
        .unwrap();

        let claims = repo.list_sync_claims().await.unwrap();
        assert_eq!(claims[0].last_updated_at, Some(collection.updated_at));
        assert_eq!(
            repo.get_collection(&collection.id)
                .await
                .unwrap()
                .unwrap()
                .title,
            "Deck v2"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_optimistic_set_card_zero_removes_entry() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        let collection = Collection::new("alice", "Deck");
        repo.upsert_collection(&collection).await.unwrap();

        let card = CollectionCard::new(collection.id, "card-a", "v1", 2);
        repo.apply_optimistic(&[OptimisticWrite::SetCard(card.clone())])
            .await
            .unwrap();
        let mut removal = card;
        removal.amount = 0;
        repo.apply_optimistic(&[OptimisticWrite::SetCard(removal)])
            .await
            .unwrap();

        assert!(repo
            .list_collection_cards(&collection.id)
            .await
            .unwrap()
            .is_empty());

        let orphan = CollectionCard::new(CollectionId::new(), "card-a", "v1", 1);
        let err = repo
            .apply_optimistic(&[OptimisticWrite::SetCard(orphan)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_response_is_idempotent() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        let gone = Collection::new("alice", "Gone");
        repo.apply_sync_response(&response_with(
            &gone,
            vec![CollectionCard::new(gone.id, "card-z", "v1", 1)],
        ))
        .await
        .unwrap();

        let fresh = Collection::new("alice", "Fresh");
        let mut response = response_with(
            &fresh,
            vec![
                CollectionCard::new(fresh.id, "card-a", "v1", 1),
                CollectionCard::new(fresh.id, "card-b", "v2", 3),
            ],
        );
        response.removed_collections.push(gone.id);

        let first = repo.apply_sync_response(&response).await.unwrap();
        let after_once = snapshot(&repo).await;
        let second = repo.apply_sync_response(&response).await.unwrap();
        let after_twice = snapshot(&repo).await;

        assert_eq!(after_once, after_twice);
        assert_eq!(first.removed, 1);
        assert_eq!(second.removed, 0);
        assert_eq!(
            repo.list_sync_claims().await.unwrap(),
            vec![SyncRequestItem {
                collection_id: fresh.id,
                last_updated_at: Some(fresh.updated_at),
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_removal_wins_over_overlapping_upsert() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        let collection = Collection::new("alice", "Contested");
        let mut response = response_with(
            &collection,
            vec![CollectionCard::new(collection.id, "card-a", "v1", 1)],
        );
        response.removed_collections.push(collection.id);

        let report = repo.apply_sync_response(&response).await.unwrap();
        assert_eq!(report.overlapping, vec![collection.id]);
        assert!(repo.list_collections().await.unwrap().is_empty());
        assert!(orphaned_card_collections(db.connection())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_card_set_for_unknown_collection_is_skipped() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        let stray = CollectionId::new();
        let mut response = SyncResponse::default();
        response
            .collection_cards_map
            .insert(stray, vec![CollectionCard::new(stray, "card-a", "v1", 1)]);

        let report = repo.apply_sync_response(&response).await.unwrap();
        assert_eq!(report.skipped_card_sets, 1);
        assert!(orphaned_card_collections(db.connection())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_apply_rolls_back_everything() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        let existing = Collection::new("alice", "Existing");
        repo.apply_sync_response(&response_with(
            &existing,
            vec![CollectionCard::new(existing.id, "card-x", "v1", 2)],
        ))
        .await
        .unwrap();
        let before = snapshot(&repo).await;

        // Simulated storage failure partway through the card inserts
        db.connection()
            .execute(
                "CREATE TRIGGER fail_on_poison BEFORE INSERT ON collection_cards
                 WHEN NEW.card_id = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END",
                (),
            )
            .await
            .unwrap();

        let mut updated = existing.clone();
        updated.updated_at = now_millis() + Duration::seconds(5);
        let newcomer = Collection::new("alice", "Newcomer");
        let mut response = response_with(
            &updated,
            vec![CollectionCard::new(existing.id, "card-x", "v1", 3)],
        );
        response.collections.push(newcomer.clone());
        response.collection_cards_map.insert(
            newcomer.id,
            vec![
                CollectionCard::new(newcomer.id, "card-ok", "v1", 1),
                CollectionCard::new(newcomer.id, "poison", "v1", 1),
            ],
        );

        assert!(repo.apply_sync_response(&response).await.is_err());
        assert_eq!(snapshot(&repo).await, before);
        assert_eq!(
            repo.list_sync_claims().await.unwrap()[0].last_updated_at,
            Some(existing.updated_at)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replica_owner_and_clear() {
        let db = setup().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        assert_eq!(repo.replica_owner().await.unwrap(), None);
        repo.set_replica_owner("alice").await.unwrap();
        assert_eq!(repo.replica_owner().await.unwrap().as_deref(), Some("alice"));

        let collection = Collection::new("alice", "Binder");
        repo.apply_sync_response(&response_with(
            &collection,
            vec![CollectionCard::new(collection.id, "card-a", "v1", 1)],
        ))
        .await
        .unwrap();

        repo.clear().await.unwrap();
        assert!(repo.list_collections().await.unwrap().is_empty());
        assert_eq!(repo.replica_owner().await.unwrap(), None);
    }
}
