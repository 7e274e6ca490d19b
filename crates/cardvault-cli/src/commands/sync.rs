use std::path::PathBuf;

use crate::commands::common::{
    format_sync_report, open_client, parse_collection_id, print_json, sync_report_to_item,
};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let context = open_client(db_path).await?;
    let report = context.sync.sync().await?;

    if as_json {
        print_json(&sync_report_to_item(&report))
    } else {
        println!("{}", format_sync_report(&report));
        Ok(())
    }
}

/// Follow a collection the replica does not hold yet and pull it in.
pub async fn run_track(id: &str, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let id = parse_collection_id(id)?;
    let context = open_client(db_path).await?;

    context.sync.track(id).await;
    let report = context.sync.sync().await?;

    match context.replica.get_collection(&id).await? {
        Some(collection) => {
            println!("Tracking {} ({})", collection.id, collection.title);
            Ok(())
        }
        None => {
            tracing::debug!(collection = %id, removed = ?report.removed, "Tracked id not returned");
            Err(CliError::CollectionNotFound(id.to_string()))
        }
    }
}
