//! cardvault CLI - keep a local replica of your card collections in sync
//!
//! Reads go to the local replica; edits go to the collection service and are
//! mirrored locally until the next sync confirms them.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::collection::{run_create, run_delete, run_set_card, run_update, CardOptions};
use crate::commands::completions::run_completions;
use crate::commands::list::{run_cards, run_list};
use crate::commands::status::{run_status, run_watch};
use crate::commands::sync::{run_sync, run_track};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let db_path = cli.db_path;

    match cli.command {
        Commands::Sync { json } => run_sync(json, db_path).await,
        Commands::List { sync, json } => run_list(sync, json, db_path).await,
        Commands::Cards { id, json } => run_cards(&id, json, db_path).await,
        Commands::Track { id } => run_track(&id, db_path).await,
        Commands::Status { id } => run_status(&id, db_path).await,
        Commands::Create { title, fields } => run_create(&title, &fields, db_path).await,
        Commands::Update { id, title, fields } => {
            run_update(&id, title.as_deref(), &fields, db_path).await
        }
        Commands::Delete { id } => run_delete(&id, db_path).await,
        Commands::SetCard {
            collection,
            card_id,
            variant_id,
            amount,
            foil,
            condition,
            language,
            price,
            note,
        } => {
            let options = CardOptions {
                foil,
                condition,
                language,
                price,
                note,
            };
            run_set_card(&collection, &card_id, &variant_id, amount, options, db_path).await
        }
        Commands::Watch { interval } => run_watch(interval, db_path).await,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cardvault=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
