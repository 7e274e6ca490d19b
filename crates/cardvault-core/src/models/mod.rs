//! Data models for cardvault

mod card;
mod collection;
mod sync;

pub use card::{CardKey, CollectionCard};
pub use collection::{Collection, CollectionDraft, CollectionId, CollectionType};
pub use sync::{SyncRequest, SyncRequestItem, SyncResponse};
