//! cardvault-core - Core library for cardvault
//!
//! This crate contains the shared models, the local replica store, and the
//! collection sync engine used by the CLI and the reference API server.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod mutations;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use cache::{CollectionsQuery, StaleTime};
pub use error::{Error, Result};
pub use events::{CollectionEvents, CollectionSetChanged, Committed};
pub use models::{Collection, CollectionCard, CollectionId};
pub use mutations::MutationClient;
pub use services::ReplicaService;
pub use sync::{CollectionService, HttpCollectionService, SyncClient, SyncReport};
