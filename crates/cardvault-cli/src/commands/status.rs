use std::path::PathBuf;
use std::time::Duration;

use cardvault_core::state::ReplicaState;
use cardvault_core::{CollectionSetChanged, CollectionsQuery, StaleTime};

use crate::commands::common::{open_client, parse_collection_id, resolve_collection};
use crate::error::CliError;

pub async fn run_status(id: &str, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let context = open_client(db_path).await?;
    let id = match resolve_collection(id, &context.replica).await {
        Ok(collection) => collection.id,
        Err(CliError::CollectionNotFound(_)) => parse_collection_id(id)?,
        Err(error) => return Err(error),
    };

    let query = CollectionsQuery::new(context.sync, context.config.stale_time);
    if let Err(error) = query.refresh().await {
        eprintln!("Sync failed, showing local state only: {error}");
    }

    let state = query.collection_state(&id).await?;
    println!("{id}  {}", describe_replica_state(state));
    Ok(())
}

pub const fn describe_replica_state(state: ReplicaState) -> &'static str {
    match state {
        ReplicaState::Synced => "synced",
        ReplicaState::PossiblyStale => "possibly stale",
        ReplicaState::Deleted => "deleted remotely",
        ReplicaState::Unknown => "unknown",
    }
}

/// Whether a watch tick should ask for a resync. Never-expiring caches are
/// never fresh enough to skip one.
pub const fn tick_needs_resync(stale_time: StaleTime, fresh: bool) -> bool {
    matches!(stale_time, StaleTime::Never) || !fresh
}

/// Drive resyncs through the change bus so ticks and local edits share one
/// debounced listener.
pub async fn run_watch(interval_secs: u64, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let context = open_client(db_path).await?;
    let stale_time = context.config.stale_time;
    let events = context.mutations.events().clone();
    let query = CollectionsQuery::new(context.sync, stale_time);
    let listener = query.spawn_resync_listener(&events, context.config.sync_debounce);

    let interval_secs = interval_secs.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    println!("Watching collections every {interval_secs}s (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if tick_needs_resync(stale_time, query.is_fresh()) {
                    tracing::debug!("Watch tick requested a resync");
                    events.publish(CollectionSetChanged::external());
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    listener.abort();
    println!("Stopped ({:?})", query.sync_state());
    Ok(())
}
