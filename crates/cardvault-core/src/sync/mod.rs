//! Synchronization between the local replica and the collection service.

mod client;
mod remote;
#[cfg(test)]
pub(crate) mod testing;

pub use client::{SyncClient, SyncReport};
pub use remote::{CollectionService, HttpCollectionService};
