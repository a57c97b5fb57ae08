use super::actor::StoreActor;
use super::{Closeable, StoreConfig, decode, encode};
use crate::clock::Clock;
use crate::domain::{CacheKey, Collection, SetRecord};
use crate::events::{EntryRemovedEvent, EntryWrittenEvent, EventFeed, RemovalReason, StoreEvent};
use crate::ports::{KvBackend, KvTree, SetStore};
use crate::stream::{Snapshots, Subscribers};
use async_trait::async_trait;
use shared::StoreResult;
use std::sync::Arc;
use tracing::{Instrument, debug, debug_span, warn};

struct SetState<C: Collection> {
    members: Arc<dyn KvTree>,
    clock: Arc<dyn Clock>,
    subscribers: Subscribers<(), (), Vec<SetRecord<C::Id>>>,
    events: Option<EventFeed>,
}

impl<C: Collection> SetState<C> {
    fn all(&self) -> StoreResult<Vec<SetRecord<C::Id>>> {
        let mut records = self
            .members
            .scan_prefix(&[])?
            .into_iter()
            .map(|(_, value)| decode::<SetRecord<C::Id>>(&value))
            .collect::<StoreResult<Vec<_>>>()?;
        records.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(records)
    }

    fn contains(&self, id: &C::Id) -> StoreResult<bool> {
        Ok(self.members.get(&id.to_bytes())?.is_some())
    }

    fn add(&mut self, id: C::Id) -> StoreResult<bool> {
        let raw = id.to_bytes();
        if self.members.get(&raw)?.is_some() {
            return Ok(false);
        }

        let record = SetRecord::new(id, self.clock.now());
        self.members.insert(&raw, encode(&record)?)?;
        debug!(collection = C::NAME, id = %record.id, "Added member");

        if let Some(events) = &self.events {
            events.publish(StoreEvent::Written(EntryWrittenEvent {
                store: C::NAME.to_string(),
                key: record.id.to_string(),
                timestamp: record.added_at,
            }));
        }
        self.notify();
        Ok(true)
    }

    fn remove(&mut self, id: &C::Id) -> StoreResult<bool> {
        let removed = self.members.remove(&id.to_bytes())?;
        if !removed {
            return Ok(false);
        }

        debug!(collection = C::NAME, id = %id, "Removed member");
        if let Some(events) = &self.events {
            events.publish(StoreEvent::Removed(EntryRemovedEvent {
                store: C::NAME.to_string(),
                key: id.to_string(),
                reason: RemovalReason::Deleted,
                timestamp: self.clock.now(),
            }));
        }
        self.notify();
        Ok(true)
    }

    fn watch(&mut self) -> StoreResult<Snapshots<Vec<SetRecord<C::Id>>>> {
        let current = self.all()?;
        Ok(self.subscribers.subscribe((), (), current))
    }

    fn notify(&mut self) {
        if !self.subscribers.is_watched(&()) {
            return;
        }

        match self.all() {
            Ok(records) => {
                self.subscribers.notify(&(), |_| records.clone());
            }
            Err(e) => warn!(collection = C::NAME, error = %e, "Could not project members for watchers"),
        }
    }
}

/// [`SetStore`] over the `<collection>.members` tree
pub struct KvSetStore<C: Collection> {
    actor: StoreActor<SetState<C>>,
}

impl<C: Collection> KvSetStore<C> {
    pub fn members_tree_name() -> String {
        format!("{}.members", C::NAME)
    }

    /// Must be called from within a Tokio runtime. The TTL in `config` is ignored;
    /// membership never expires.
    pub fn new(backend: &dyn KvBackend, clock: Arc<dyn Clock>, config: StoreConfig) -> StoreResult<Self> {
        let state = SetState {
            members: backend.open_tree(&Self::members_tree_name())?,
            clock,
            subscribers: Subscribers::new(),
            events: config.events,
        };

        Ok(Self {
            actor: StoreActor::spawn(C::NAME, state, config.mailbox_capacity)?,
        })
    }
}

#[async_trait]
impl<C: Collection> Closeable for KvSetStore<C> {
    async fn close(&self) {
        self.actor.close().await;
    }
}

#[async_trait]
impl<C: Collection> SetStore<C> for KvSetStore<C> {
    async fn all(&self) -> StoreResult<Vec<SetRecord<C::Id>>> {
        self.actor.try_call(|state| state.all()).await
    }

    async fn contains(&self, id: &C::Id) -> StoreResult<bool> {
        let id = id.clone();
        self.actor.try_call(move |state| state.contains(&id)).await
    }

    async fn add(&self, id: C::Id) -> StoreResult<bool> {
        let span = debug_span!("set_store.add", entity_type = C::NAME, entity_id = %id);
        self.actor
            .try_call(move |state| state.add(id))
            .instrument(span)
            .await
    }

    async fn remove(&self, id: &C::Id) -> StoreResult<bool> {
        let span = debug_span!("set_store.remove", entity_type = C::NAME, entity_id = %id);
        let id = id.clone();
        self.actor
            .try_call(move |state| state.remove(&id))
            .instrument(span)
            .await
    }

    async fn watch(&self) -> StoreResult<Snapshots<Vec<SetRecord<C::Id>>>> {
        self.actor.try_call(|state| state.watch()).await
    }
}

impl<C: Collection> std::fmt::Debug for KvSetStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSetStore")
            .field("collection", &C::NAME)
            .field("actor", &self.actor)
            .finish()
    }
}
