use std::path::PathBuf;

use cardvault_core::models::{CollectionCard, CollectionDraft};

use crate::cli::CollectionFields;
use crate::commands::common::{apply_fields, has_any_field, open_client, resolve_collection};
use crate::error::CliError;

pub async fn run_create(
    title: &str,
    fields: &CollectionFields,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let draft = apply_fields(CollectionDraft::new(title.trim()), fields)?;
    let context = open_client(db_path).await?;

    let collection = context.mutations.create_collection(&draft).await?;
    println!("{}", collection.id);
    Ok(())
}

pub async fn run_update(
    id: &str,
    title: Option<&str>,
    fields: &CollectionFields,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    if title.is_none() && !has_any_field(fields) {
        return Err(CliError::NothingToUpdate);
    }

    let context = open_client(db_path).await?;
    let collection = resolve_collection(id, &context.replica).await?;

    let mut draft = apply_fields(CollectionDraft::from_collection(&collection), fields)?;
    if let Some(title) = title {
        title.trim().clone_into(&mut draft.title);
    }

    let updated = context
        .mutations
        .update_collection(&collection.id, &draft)
        .await?;
    println!("{}", updated.id);
    Ok(())
}

pub async fn run_delete(id: &str, db_path: Option<PathBuf>) -> Result<(), CliError> {
    let context = open_client(db_path).await?;
    let collection = resolve_collection(id, &context.replica).await?;

    context.mutations.delete_collection(&collection.id).await?;
    println!("{}", collection.id);
    Ok(())
}

/// Card-entry flags for `set-card`
#[derive(Debug, Default)]
pub struct CardOptions {
    pub foil: bool,
    pub condition: Option<String>,
    pub language: Option<String>,
    pub price: Option<f64>,
    pub note: Option<String>,
}

pub async fn run_set_card(
    collection: &str,
    card_id: &str,
    variant_id: &str,
    amount: i64,
    options: CardOptions,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = open_client(db_path).await?;
    let collection = resolve_collection(collection, &context.replica).await?;

    let card = CollectionCard {
        foil: options.foil,
        condition: options.condition,
        language: options.language,
        price: options.price,
        note: options.note.unwrap_or_default(),
        ..CollectionCard::new(collection.id, card_id.trim(), variant_id.trim(), amount)
    };
    context.mutations.set_card(&card).await?;

    if amount == 0 {
        println!("Removed {card_id} ({variant_id}) from {}", collection.title);
    } else {
        println!("{amount}x {card_id} ({variant_id}) in {}", collection.title);
    }
    Ok(())
}
