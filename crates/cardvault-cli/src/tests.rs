use std::path::PathBuf;
use std::time::Duration;

use cardvault_core::models::{Collection, CollectionCard, CollectionDraft, CollectionType};
use cardvault_core::state::ReplicaState;
use cardvault_core::{ReplicaService, StaleTime, SyncReport};
use clap::Parser;
use pretty_assertions::assert_eq;

use crate::cli::{Cli, CollectionFields, Commands, CompletionShell};
use crate::commands::common::{
    apply_fields, collection_to_list_item, format_card_lines, format_collection_lines,
    format_relative_time, format_sync_report, has_any_field, normalize_collection_identifier,
    parse_collection_id, resolve_collection, resolve_db_path, short_id,
};
use crate::commands::completions::run_completions;
use crate::commands::status::{describe_replica_state, tick_needs_resync};
use crate::error::CliError;

#[test]
fn format_relative_time_buckets() {
    let now = 1_000_000_000_000;
    assert_eq!(format_relative_time(now - 10_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(now - 400 * 86_400_000, now), "1y ago");
}

#[test]
fn db_path_prefers_flag_then_config() {
    let flag = PathBuf::from("/tmp/flag.db");
    let configured = PathBuf::from("/tmp/env.db");

    assert_eq!(
        resolve_db_path(Some(flag.clone()), Some(configured.clone())).unwrap(),
        flag
    );
    assert_eq!(resolve_db_path(None, Some(configured.clone())).unwrap(), configured);
}

#[test]
fn collection_identifier_is_trimmed_and_required() {
    assert_eq!(
        normalize_collection_identifier("  0190abcd ").unwrap(),
        "0190abcd"
    );
    assert!(matches!(
        normalize_collection_identifier("   "),
        Err(CliError::EmptyCollectionId)
    ));
    assert!(matches!(
        parse_collection_id("binder"),
        Err(CliError::InvalidCollectionId(_))
    ));
}

#[test]
fn apply_fields_overlays_only_passed_flags() {
    let base = CollectionDraft {
        description: "old".to_string(),
        public: true,
        ..CollectionDraft::new("Binder")
    };
    let fields = CollectionFields {
        wantlist: Some(true),
        collection_type: Some("trade-binder".to_string()),
        ..CollectionFields::default()
    };

    let draft = apply_fields(base, &fields).unwrap();
    assert_eq!(draft.title, "Binder");
    assert_eq!(draft.description, "old");
    assert!(draft.public);
    assert!(draft.wantlist);
    assert_eq!(draft.collection_type, CollectionType::TradeBinder);
    assert!(has_any_field(&fields));
    assert!(!has_any_field(&CollectionFields::default()));
}

#[test]
fn apply_fields_rejects_unknown_type() {
    let fields = CollectionFields {
        collection_type: Some("shoebox".to_string()),
        ..CollectionFields::default()
    };
    assert!(matches!(
        apply_fields(CollectionDraft::new("Box"), &fields),
        Err(CliError::InvalidCollectionType(_))
    ));
}

#[test]
fn collection_lines_flag_foreign_and_public_collections() {
    let mine = Collection::new("alice", "Deck");
    let theirs = Collection {
        public: true,
        ..Collection::new("bob", "Cube")
    };

    let lines = format_collection_lines(&[mine.clone(), theirs], "alice");
    assert!(lines[0].starts_with(&short_id(&mine.id)));
    assert!(!lines[0].contains('['));
    assert!(lines[1].ends_with("[public, @bob]"));

    let item = collection_to_list_item(&mine);
    assert_eq!(item.id, mine.id.to_string());
    assert_eq!(item.collection_type, "collection");
}

#[test]
fn card_lines_include_optional_details() {
    let collection = Collection::new("alice", "Binder");
    let card = CollectionCard {
        foil: true,
        condition: Some("NM".to_string()),
        price: Some(2.5),
        note: "from prerelease".to_string(),
        ..CollectionCard::new(collection.id, "card-1", "v1", 3)
    };

    assert_eq!(
        format_card_lines(&[card]),
        vec!["   3x  card-1 (v1) foil NM  @ 2.50  # from prerelease".to_string()]
    );
}

#[test]
fn sync_report_summary() {
    assert_eq!(
        format_sync_report(&SyncReport {
            claims_sent: 4,
            ..SyncReport::default()
        }),
        "Already up to date (4 claims checked)"
    );
}

#[test]
fn replica_states_have_labels() {
    assert_eq!(describe_replica_state(ReplicaState::Synced), "synced");
    assert_eq!(
        describe_replica_state(ReplicaState::Deleted),
        "deleted remotely"
    );
}

#[test]
fn watch_ticks_resync_only_when_needed() {
    let ttl = StaleTime::After(Duration::from_secs(30));
    assert!(!tick_needs_resync(ttl, true));
    assert!(tick_needs_resync(ttl, false));
    assert!(tick_needs_resync(StaleTime::Never, true));
}

#[test]
fn set_card_accepts_negative_amounts() {
    let cli = Cli::try_parse_from([
        "cardvault", "set-card", "0190", "card-1", "v1", "-2", "--foil",
    ])
    .unwrap();

    match cli.command {
        Commands::SetCard { amount, foil, .. } => {
            assert_eq!(amount, -2);
            assert!(foil);
        }
        _ => panic!("expected set-card"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_collection_by_exact_id_and_prefix() {
    let replica = ReplicaService::open_in_memory().await.unwrap();
    let binder = Collection::new("alice", "Binder");
    replica.upsert_collection(&binder).await.unwrap();

    let by_id = resolve_collection(&binder.id.to_string(), &replica)
        .await
        .unwrap();
    assert_eq!(by_id, binder);

    let by_prefix = resolve_collection(&short_id(&binder.id), &replica)
        .await
        .unwrap();
    assert_eq!(by_prefix.id, binder.id);

    assert!(matches!(
        resolve_collection("ffffffff", &replica).await,
        Err(CliError::CollectionNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn ambiguous_prefix_is_rejected() {
    let replica = ReplicaService::open_in_memory().await.unwrap();
    let first = Collection::new("alice", "One");
    let second = Collection::new("alice", "Two");
    replica.upsert_collection(&first).await.unwrap();
    replica.upsert_collection(&second).await.unwrap();

    let shared_prefix = first
        .id
        .to_string()
        .chars()
        .zip(second.id.to_string().chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect::<String>();
    if shared_prefix.is_empty() {
        return;
    }

    assert!(matches!(
        resolve_collection(&shared_prefix, &replica).await,
        Err(CliError::AmbiguousCollectionId(_))
    ));
}

#[test]
fn completions_write_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cardvault.bash");

    run_completions(CompletionShell::Bash, Some(&path)).unwrap();
    let script = std::fs::read_to_string(&path).unwrap();
    assert!(script.contains("cardvault"));
}
