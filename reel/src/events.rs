use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Store mutation, published on the optional change feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    Written(EntryWrittenEvent),
    Removed(EntryRemovedEvent),
    PageWritten(PageEvent),
    PagesInvalidated(PageEvent),
}

impl StoreEvent {
    pub fn store(&self) -> &str {
        match self {
            StoreEvent::Written(e) => &e.store,
            StoreEvent::Removed(e) => &e.store,
            StoreEvent::PageWritten(e) | StoreEvent::PagesInvalidated(e) => &e.store,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StoreEvent::Written(e) => &e.key,
            StoreEvent::Removed(e) => &e.key,
            StoreEvent::PageWritten(e) | StoreEvent::PagesInvalidated(e) => &e.parent,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StoreEvent::Written(e) => e.timestamp,
            StoreEvent::Removed(e) => e.timestamp,
            StoreEvent::PageWritten(e) | StoreEvent::PagesInvalidated(e) => e.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryWrittenEvent {
    pub store: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Expired,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryRemovedEvent {
    pub store: String,
    pub key: String,
    pub reason: RemovalReason,
    pub timestamp: DateTime<Utc>,
}

/// Page-level event. For invalidations `page` is the first page removed;
/// every later page of the parent went with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageEvent {
    pub store: String,
    pub parent: String,
    pub page: u32,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast change feed shared by any number of stores.
///
/// Lossy: a receiver that falls behind by more than the capacity skips events.
/// Use store `watch` streams when every snapshot matters.
#[derive(Clone, Debug)]
pub struct EventFeed {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Events as a stream, skipping over gaps left by lagging
    pub fn stream(&self) -> impl Stream<Item = StoreEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|result| async move {
            match result {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!("Change feed receiver lagged by {} events", n);
                    None
                }
            }
        })
    }

    pub fn publish(&self, event: StoreEvent) {
        let store = event.store().to_string();
        match self.tx.send(event) {
            Ok(subscriber_count) => {
                tracing::debug!(
                    "Broadcasted event for store '{}' to {} subscriber(s)",
                    store,
                    subscriber_count
                );
            }
            Err(_) => {
                tracing::trace!("No subscribers for event on store '{}'", store);
            }
        }
    }
}
