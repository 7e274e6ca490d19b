//! Typed change events for the synchronized collection set.
//!
//! Mutations publish a [`CollectionSetChanged`] after the collection service
//! accepts them; the query cache subscribes and invalidates itself. A remote
//! result is wrapped in [`Committed`], whose value is only reachable through
//! [`Committed::publish`], so a success path cannot forget the event.

use tokio::sync::broadcast;

use crate::models::CollectionId;

const DEFAULT_CAPACITY: usize = 256;

/// What kind of change the service accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    Created,
    Updated,
    Deleted,
    CardsChanged,
    /// Raised outside this process (e.g. a manual refresh request)
    External,
}

/// The synchronized collection set changed on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSetChanged {
    pub collection_id: Option<CollectionId>,
    pub cause: ChangeCause,
}

impl CollectionSetChanged {
    #[must_use]
    pub const fn new(collection_id: CollectionId, cause: ChangeCause) -> Self {
        Self {
            collection_id: Some(collection_id),
            cause,
        }
    }

    #[must_use]
    pub const fn external() -> Self {
        Self {
            collection_id: None,
            cause: ChangeCause::External,
        }
    }
}

/// Broadcast bus for collection change events
#[derive(Clone)]
pub struct CollectionEvents {
    sender: broadcast::Sender<CollectionSetChanged>,
}

impl Default for CollectionEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CollectionEvents {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; returns how many subscribers received it.
    pub fn publish(&self, event: CollectionSetChanged) -> usize {
        tracing::debug!(
            "Collection set changed ({:?}) for {:?}",
            event.cause,
            event.collection_id
        );
        self.sender.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CollectionSetChanged> {
        self.sender.subscribe()
    }
}

/// A value the collection service has accepted but whose change event has not
/// been published yet.
#[must_use = "publish the change event to release the committed value"]
#[derive(Debug)]
pub struct Committed<T> {
    value: T,
    change: CollectionSetChanged,
}

impl<T> Committed<T> {
    pub(crate) const fn new(value: T, change: CollectionSetChanged) -> Self {
        Self { value, change }
    }

    /// The event that will be published
    pub const fn change(&self) -> &CollectionSetChanged {
        &self.change
    }

    /// Emit the change event and hand back the value.
    pub fn publish(self, events: &CollectionEvents) -> T {
        events.publish(self.change);
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn committed_value_is_released_only_with_its_event() {
        let events = CollectionEvents::default();
        let mut receiver = events.subscribe();
        let id = CollectionId::new();

        let committed = Committed::new("value", CollectionSetChanged::new(id, ChangeCause::Updated));
        assert_eq!(committed.change().collection_id, Some(id));
        assert_eq!(committed.publish(&events), "value");

        let event = receiver.recv().await.unwrap();
        assert_eq!(event, CollectionSetChanged::new(id, ChangeCause::Updated));
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let events = CollectionEvents::new(4);
        assert_eq!(events.publish(CollectionSetChanged::external()), 0);
    }
}
