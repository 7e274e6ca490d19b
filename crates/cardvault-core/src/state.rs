//! Shared client state types.

/// Progress of the synchronized collection set as a whole.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    /// No sync has completed yet
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
}

/// What the client knows about one collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaState {
    /// Never seen by this replica
    Unknown,
    /// Held locally and confirmed by a sync that is still fresh
    Synced,
    /// Held locally, but invalidated, expired, or only written optimistically
    PossiblyStale,
    /// The service told us to drop it
    Deleted,
}
