//! Database layer for the local replica

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{
    orphaned_card_collections, ApplyReport, LibSqlReplicaStore, OptimisticWrite, ReplicaStore,
};
