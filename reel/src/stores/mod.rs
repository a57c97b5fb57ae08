//! Store implementations over a [`KvBackend`](crate::ports::KvBackend).
//!
//! Every store instance owns one actor task; all of its reads, writes and
//! subscriptions run there one at a time in submission order.

pub(crate) mod actor;
pub mod entity;
pub mod paged;
pub mod set;

pub use entity::KvEntityStore;
pub use paged::KvPagedStore;
pub use set::KvSetStore;

use crate::clock::to_time_delta;
use crate::events::EventFeed;
use async_trait::async_trait;
use chrono::TimeDelta;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{StoreError, StoreResult};
use std::time::Duration;

/// A store whose owning task can be stopped
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Finish every queued operation, then stop the task and release its backend
    /// trees. Operations issued afterwards fail with [`StoreError::Closed`].
    async fn close(&self);
}

/// Construction parameters for a store. There are no hidden defaults for the TTL.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub ttl: Duration,
    pub mailbox_capacity: usize,
    pub events: Option<EventFeed>,
}

impl StoreConfig {
    pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            mailbox_capacity: Self::DEFAULT_MAILBOX_CAPACITY,
            events: None,
        }
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    pub fn with_events(mut self, events: EventFeed) -> Self {
        self.events = Some(events);
        self
    }

    pub(crate) fn ttl_delta(&self) -> TimeDelta {
        to_time_delta(self.ttl)
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
