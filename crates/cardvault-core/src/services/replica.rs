//! Shared replica service used by the sync client, cache, and mutation paths.
//!
//! Every access goes through one async mutex, so a bulk sync apply and an
//! optimistic write can never interleave inside each other's transaction.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    orphaned_card_collections, ApplyReport, Database, LibSqlReplicaStore, OptimisticWrite,
    ReplicaStore,
};
use crate::models::{Collection, CollectionCard, CollectionId, SyncRequestItem, SyncResponse};
use crate::Result;

/// Thread-safe, single-writer handle to the local replica.
#[derive(Clone)]
pub struct ReplicaService {
    db: Arc<Mutex<Database>>,
}

impl ReplicaService {
    /// Open a replica at the given filesystem path.
    ///
    /// A file that is not a valid database is moved aside and replaced by an
    /// empty replica; the next sync repopulates it from the server.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local replica at {} is unreadable: {}. Resetting it.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory replica (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Bind the replica to `user_id`, wiping it if it belonged to someone else.
    ///
    /// Returns `true` when existing data was discarded.
    pub async fn claim_for_user(&self, user_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());

        match repo.replica_owner().await? {
            Some(owner) if owner == user_id => Ok(false),
            Some(_) => {
                tracing::warn!("Local replica belongs to another user; clearing it");
                repo.clear().await?;
                repo.set_replica_owner(user_id).await?;
                Ok(true)
            }
            None => {
                let had_data = !repo.list_collections().await?.is_empty();
                if had_data {
                    tracing::warn!("Local replica has no recorded owner; clearing it");
                    repo.clear().await?;
                }
                repo.set_replica_owner(user_id).await?;
                Ok(had_data)
            }
        }
    }

    /// List every locally held collection.
    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.list_collections().await
    }

    /// Fetch a collection by id.
    pub async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.get_collection(id).await
    }

    /// List the cards of a collection.
    pub async fn list_collection_cards(
        &self,
        collection_id: &CollectionId,
    ) -> Result<Vec<CollectionCard>> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.list_collection_cards(collection_id).await
    }

    /// Freshness claims for the next bulk-sync request.
    pub async fn list_sync_claims(&self) -> Result<Vec<SyncRequestItem>> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.list_sync_claims().await
    }

    /// Insert or overwrite a collection record.
    pub async fn upsert_collection(&self, collection: &Collection) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.upsert_collection(collection).await
    }

    /// Replace the card set of a collection.
    pub async fn upsert_collection_cards(
        &self,
        collection_id: &CollectionId,
        cards: &[CollectionCard],
    ) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.upsert_collection_cards(collection_id, cards).await
    }

    /// Delete a collection and its cards.
    pub async fn delete_collection(&self, id: &CollectionId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.delete_collection(id).await
    }

    /// Apply a sync response in one transaction.
    pub async fn apply_sync_response(&self, response: &SyncResponse) -> Result<ApplyReport> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.apply_sync_response(response).await
    }

    /// Apply optimistic writes in one transaction.
    pub async fn apply_optimistic(&self, writes: &[OptimisticWrite]) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.apply_optimistic(writes).await
    }

    /// Wipe the replica.
    pub async fn clear(&self) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaStore::new(db.connection());
        repo.clear().await
    }

    /// Collection ids referenced by cards but not present locally.
    pub async fn integrity_violations(&self) -> Result<BTreeSet<String>> {
        let db = self.db.lock().await;
        orphaned_card_collections(db.connection()).await
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database")
            || message.contains("database disk image is malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("replica.db");
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local replica from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale replica file {}", path.display());
            }
        }

        Ok(())
    }
}
