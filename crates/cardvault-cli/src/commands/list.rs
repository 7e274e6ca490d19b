use std::path::PathBuf;

use cardvault_core::config::ClientConfig;

use crate::commands::common::{
    collection_to_list_item, format_card_lines, format_collection_lines, format_sync_report,
    open_client, open_replica, print_json, resolve_collection, CollectionListItem,
};
use crate::error::CliError;

pub async fn run_list(sync: bool, as_json: bool, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let (replica, user_id) = if sync {
        let context = open_client(db_path).await?;
        let report = context.sync.sync().await?;
        if !as_json {
            eprintln!("{}", format_sync_report(&report));
        }
        (context.replica, context.config.user_id)
    } else {
        let config = ClientConfig::from_env()?;
        (open_replica(&config, db_path).await?, config.user_id)
    };

    let collections = replica.list_collections().await?;
    if as_json {
        let items = collections
            .iter()
            .map(collection_to_list_item)
            .collect::<Vec<CollectionListItem>>();
        return print_json(&items);
    }

    if collections.is_empty() {
        println!("No collections in the local replica. Run `cardvault sync` first.");
        return Ok(());
    }
    for line in format_collection_lines(&collections, &user_id) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_cards(id: &str, as_json: bool, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let config = ClientConfig::from_env()?;
    let replica = open_replica(&config, db_path).await?;
    let collection = resolve_collection(id, &replica).await?;
    let cards = replica.list_collection_cards(&collection.id).await?;

    if as_json {
        return print_json(&cards);
    }

    println!("{} ({})", collection.title, collection.id);
    if cards.is_empty() {
        println!("  (no cards)");
    }
    for line in format_card_lines(&cards) {
        println!("  {line}");
    }
    Ok(())
}
