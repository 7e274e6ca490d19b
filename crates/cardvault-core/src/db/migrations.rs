//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < CURRENT_VERSION {
        tracing::info!("Local replica schema is now at version {CURRENT_VERSION}");
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Execute a migration's statements inside one transaction
async fn apply_statements(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [i64::from(version)],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::debug!("Applied local replica migration {version}");
    Ok(())
}

/// Migration to version 1: collections and their cards
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Collections; synced_at is the updatedAt last received with a full card set
        "CREATE TABLE IF NOT EXISTS collections (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            owner_id TEXT NOT NULL,
            wantlist INTEGER NOT NULL DEFAULT 0,
            public INTEGER NOT NULL DEFAULT 0,
            collection_type TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            synced_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_collections_owner ON collections(owner_id)",
        "CREATE INDEX IF NOT EXISTS idx_collections_updated ON collections(updated_at DESC)",
        // Cards; empty string stands in for a missing condition/language so the key stays total
        "CREATE TABLE IF NOT EXISTS collection_cards (
            collection_id TEXT NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
            card_id TEXT NOT NULL,
            variant_id TEXT NOT NULL,
            foil INTEGER NOT NULL DEFAULT 0,
            condition TEXT NOT NULL DEFAULT '',
            language TEXT NOT NULL DEFAULT '',
            amount INTEGER NOT NULL,
            price REAL,
            note TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (collection_id, card_id, variant_id, foil, condition, language)
        )",
        "CREATE INDEX IF NOT EXISTS idx_collection_cards_card ON collection_cards(card_id)",
    ];

    apply_statements(conn, 1, &statements).await
}

/// Migration to version 2: replica metadata (owning user)
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = ["CREATE TABLE IF NOT EXISTS replica_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"];

    apply_statements(conn, 2, &statements).await
}
