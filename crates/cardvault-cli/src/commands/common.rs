use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use cardvault_core::config::ClientConfig;
use cardvault_core::models::{Collection, CollectionCard, CollectionDraft, CollectionId};
use cardvault_core::{
    CollectionEvents, HttpCollectionService, MutationClient, ReplicaService, SyncClient,
    SyncReport,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::CollectionFields;
use crate::error::CliError;

/// Everything a command needs to talk to the replica and the service
pub struct ClientContext {
    pub config: ClientConfig,
    pub replica: ReplicaService,
    pub sync: SyncClient<HttpCollectionService>,
    pub mutations: MutationClient<HttpCollectionService>,
}

#[derive(Debug, Serialize)]
pub struct CollectionListItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub owner_id: String,
    pub collection_type: String,
    pub wantlist: bool,
    pub public: bool,
    pub updated_at: String,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncReportItem {
    pub claims_sent: usize,
    pub upserted: Vec<String>,
    pub card_sets_replaced: usize,
    pub removed: Vec<String>,
    pub skipped_card_sets: usize,
    pub duration_ms: u64,
}

pub async fn open_client(cli_db_path: Option<PathBuf>) -> Result<ClientContext, CliError> {
    let config = ClientConfig::from_env()?;
    let replica = open_replica(&config, cli_db_path).await?;

    let service = Arc::new(HttpCollectionService::with_timeout(
        &config.api_url,
        &config.access_token,
        config.http_timeout,
    )?);

    Ok(ClientContext {
        sync: SyncClient::new(Arc::clone(&service), replica.clone()),
        mutations: MutationClient::new(service, replica.clone(), CollectionEvents::default()),
        replica,
        config,
    })
}

pub async fn open_replica(
    config: &ClientConfig,
    cli_db_path: Option<PathBuf>,
) -> Result<ReplicaService, CliError> {
    let db_path = resolve_db_path(cli_db_path, config.db_path.clone())?;
    let replica = ReplicaService::open_path(&db_path).await?;
    if replica.claim_for_user(&config.user_id).await? {
        eprintln!(
            "Local replica at {} was cleared because it belonged to a different user.",
            db_path.display()
        );
    }
    Ok(replica)
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    configured: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or(configured) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("cardvault").join("replica.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub fn normalize_collection_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyCollectionId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn parse_collection_id(id: &str) -> Result<CollectionId, CliError> {
    let normalized = normalize_collection_identifier(id)?;
    normalized
        .parse()
        .map_err(|_| CliError::InvalidCollectionId(normalized))
}

/// Resolve a full id or a unique prefix against the local replica.
pub async fn resolve_collection(
    query: &str,
    replica: &ReplicaService,
) -> Result<Collection, CliError> {
    let query = normalize_collection_identifier(query)?;
    if let Ok(id) = query.parse::<CollectionId>() {
        if let Some(collection) = replica.get_collection(&id).await? {
            return Ok(collection);
        }
    }

    let needle = query.to_ascii_lowercase();
    let mut matches = replica
        .list_collections()
        .await?
        .into_iter()
        .filter(|collection| collection.id.to_string().starts_with(&needle))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::CollectionNotFound(query)),
        1 => Ok(matches.remove(0)),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|collection| short_id(&collection.id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousCollectionId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Overlay the flags that were passed onto `draft`.
pub fn apply_fields(
    mut draft: CollectionDraft,
    fields: &CollectionFields,
) -> Result<CollectionDraft, CliError> {
    if let Some(description) = &fields.description {
        draft.description = description.trim().to_string();
    }
    if let Some(wantlist) = fields.wantlist {
        draft.wantlist = wantlist;
    }
    if let Some(public) = fields.public {
        draft.public = public;
    }
    if let Some(collection_type) = &fields.collection_type {
        draft.collection_type = collection_type
            .parse()
            .map_err(CliError::InvalidCollectionType)?;
    }
    Ok(draft)
}

pub const fn has_any_field(fields: &CollectionFields) -> bool {
    fields.description.is_some()
        || fields.wantlist.is_some()
        || fields.public.is_some()
        || fields.collection_type.is_some()
}

pub fn short_id(id: &CollectionId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_collection_lines(collections: &[Collection], user_id: &str) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    collections
        .iter()
        .map(|collection| {
            let mut flags = Vec::new();
            if collection.wantlist {
                flags.push("wantlist".to_string());
            }
            if collection.public {
                flags.push("public".to_string());
            }
            if !collection.is_owned_by(user_id) {
                flags.push(format!("@{}", collection.owner_id));
            }

            let line = format!(
                "{:<13}  {:<12}  {:<32}  {}",
                short_id(&collection.id),
                collection.collection_type.as_str(),
                collection.title,
                format_relative_time(collection.updated_at.timestamp_millis(), now_ms),
            );
            if flags.is_empty() {
                line
            } else {
                format!("{line}  [{}]", flags.join(", "))
            }
        })
        .collect()
}

pub fn collection_to_list_item(collection: &Collection) -> CollectionListItem {
    let now_ms = Utc::now().timestamp_millis();
    CollectionListItem {
        id: collection.id.to_string(),
        title: collection.title.clone(),
        description: collection.description.clone(),
        owner_id: collection.owner_id.clone(),
        collection_type: collection.collection_type.to_string(),
        wantlist: collection.wantlist,
        public: collection.public,
        updated_at: format_sync_timestamp(collection.updated_at),
        relative_time: format_relative_time(collection.updated_at.timestamp_millis(), now_ms),
    }
}

pub fn format_card_lines(cards: &[CollectionCard]) -> Vec<String> {
    cards
        .iter()
        .map(|card| {
            let mut line = format!("{:>4}x  {} ({})", card.amount, card.card_id, card.variant_id);
            if card.foil {
                line.push_str(" foil");
            }
            if let Some(condition) = &card.condition {
                let _ = write!(line, " {condition}");
            }
            if let Some(language) = &card.language {
                let _ = write!(line, " [{language}]");
            }
            if let Some(price) = card.price {
                let _ = write!(line, "  @ {price:.2}");
            }
            if !card.note.is_empty() {
                let _ = write!(line, "  # {}", card.note);
            }
            line
        })
        .collect()
}

pub fn sync_report_to_item(report: &SyncReport) -> SyncReportItem {
    SyncReportItem {
        claims_sent: report.claims_sent,
        upserted: report.upserted.iter().map(ToString::to_string).collect(),
        card_sets_replaced: report.card_sets_replaced,
        removed: report.removed.iter().map(ToString::to_string).collect(),
        skipped_card_sets: report.skipped_card_sets,
        duration_ms: report.duration_ms,
    }
}

pub fn format_sync_report(report: &SyncReport) -> String {
    if report.is_noop() {
        return format!("Already up to date ({} claims checked)", report.claims_sent);
    }
    format!(
        "Synced: {} updated, {} removed, {} card sets replaced ({} ms)",
        report.upserted.len(),
        report.removed.len(),
        report.card_sets_replaced,
        report.duration_ms
    )
}

pub fn format_sync_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
