use super::actor::StoreActor;
use super::{Closeable, StoreConfig, decode, encode};
use crate::changes::{ListenerId, TouchedKeys, TreeChanges};
use crate::clock::Clock;
use crate::domain::{CacheKey, CacheRecord, Entity};
use crate::events::{EntryRemovedEvent, EntryWrittenEvent, EventFeed, RemovalReason, StoreEvent};
use crate::ports::{EntityStore, KvBackend, KvTree};
use crate::stream::{Snapshots, Subscribers};
use async_trait::async_trait;
use chrono::TimeDelta;
use shared::StoreResult;
use std::sync::Arc;
use tracing::{Instrument, debug, debug_span, field, warn};

struct EntityState<E: Entity> {
    tree: Arc<dyn KvTree>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    subscribers: Subscribers<E::Key, (), Option<E>>,
    events: Option<EventFeed>,
    changes: TreeChanges,
    listener: ListenerId,
}

impl<E: Entity> EntityState<E> {
    fn read(&mut self, key: &E::Key) -> StoreResult<Option<E>> {
        let raw = key.to_bytes();
        let Some(bytes) = self.tree.get(&raw)? else {
            return Ok(None);
        };

        let record: CacheRecord<E::Key, E> = decode(&bytes)?;
        let now = self.clock.now();
        if record.is_fresh(now, self.ttl) {
            return Ok(Some(record.payload));
        }

        // lazy eviction: a stale record never survives the read that found it
        self.tree.remove(&raw)?;
        debug!(
            entity_type = E::NAME,
            entity_id = %key,
            cached_at = %record.cached_at,
            "Evicted stale record"
        );
        self.subscribers.notify(key, |_| None);
        self.publish_removed(key, RemovalReason::Expired);
        self.announce(key);

        Ok(None)
    }

    fn write(&mut self, key: E::Key, value: E) -> StoreResult<()> {
        let record = CacheRecord::new(key, value, self.clock.now());
        self.tree.insert(&record.key.to_bytes(), encode(&record)?)?;

        let CacheRecord { key, payload, cached_at } = record;
        self.subscribers.notify(&key, |_| Some(payload.clone()));
        self.announce(&key);
        if let Some(events) = &self.events {
            events.publish(StoreEvent::Written(EntryWrittenEvent {
                store: E::NAME.to_string(),
                key: key.to_string(),
                timestamp: cached_at,
            }));
        }

        Ok(())
    }

    fn delete(&mut self, key: &E::Key) -> StoreResult<bool> {
        let removed = self.tree.remove(&key.to_bytes())?;
        if removed {
            self.subscribers.notify(key, |_| None);
            self.publish_removed(key, RemovalReason::Deleted);
            self.announce(key);
        }
        Ok(removed)
    }

    fn watch(&mut self, key: E::Key) -> StoreResult<Snapshots<Option<E>>> {
        let current = self.read(&key)?;
        Ok(self.subscribers.subscribe(key, (), current))
    }

    /// Fresh value without evicting a stale record
    fn current(&self, key: &E::Key) -> StoreResult<Option<E>> {
        let Some(bytes) = self.tree.get(&key.to_bytes())? else {
            return Ok(None);
        };
        let record: CacheRecord<E::Key, E> = decode(&bytes)?;
        Ok(record
            .is_fresh(self.clock.now(), self.ttl)
            .then_some(record.payload))
    }

    /// Another store over this tree rewrote or dropped `keys`
    fn on_records_changed(&mut self, keys: TouchedKeys) {
        for key in self.subscribers.keys() {
            if !keys.contains(&key.to_bytes()) {
                continue;
            }
            match self.current(&key) {
                Ok(value) => {
                    self.subscribers.notify(&key, |_| value.clone());
                }
                Err(e) => {
                    warn!(entity_type = E::NAME, entity_id = %key, error = %e, "Could not refresh watchers");
                }
            }
        }
    }

    fn announce(&self, key: &E::Key) {
        self.changes.publish(E::NAME, self.listener, vec![key.to_bytes()]);
    }

    fn publish_removed(&self, key: &E::Key, reason: RemovalReason) {
        if let Some(events) = &self.events {
            events.publish(StoreEvent::Removed(EntryRemovedEvent {
                store: E::NAME.to_string(),
                key: key.to_string(),
                reason,
                timestamp: self.clock.now(),
            }));
        }
    }
}

/// [`EntityStore`] over one backend tree named after the entity type
pub struct KvEntityStore<E: Entity> {
    actor: StoreActor<EntityState<E>>,
}

impl<E: Entity> KvEntityStore<E> {
    /// Must be called from within a Tokio runtime
    pub fn new(backend: &dyn KvBackend, clock: Arc<dyn Clock>, config: StoreConfig) -> StoreResult<Self> {
        let changes = backend.changes().clone();
        let (listener, touched) = changes.listen(E::NAME);
        let state = EntityState {
            tree: backend.open_tree(E::NAME)?,
            ttl: config.ttl_delta(),
            clock,
            subscribers: Subscribers::new(),
            events: config.events,
            changes,
            listener,
        };

        Ok(Self {
            actor: StoreActor::spawn_listening(
                E::NAME,
                state,
                config.mailbox_capacity,
                touched,
                EntityState::<E>::on_records_changed,
            )?,
        })
    }
}

#[async_trait]
impl<E: Entity> Closeable for KvEntityStore<E> {
    async fn close(&self) {
        self.actor.close().await;
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for KvEntityStore<E> {
    async fn read(&self, key: &E::Key) -> StoreResult<Option<E>> {
        let span = debug_span!(
            "entity_store.read",
            entity_type = E::NAME,
            entity_id = %key,
            cache.hit = field::Empty
        );
        let key = key.clone();
        let result = self
            .actor
            .try_call(move |state| state.read(&key))
            .instrument(span.clone())
            .await;
        if let Ok(found) = &result {
            span.record("cache.hit", found.is_some());
        }
        result
    }

    async fn write(&self, key: E::Key, value: E) -> StoreResult<()> {
        let span = debug_span!("entity_store.write", entity_type = E::NAME, entity_id = %key);
        self.actor
            .try_call(move |state| state.write(key, value))
            .instrument(span)
            .await
    }

    async fn delete(&self, key: &E::Key) -> StoreResult<bool> {
        let span = debug_span!("entity_store.delete", entity_type = E::NAME, entity_id = %key);
        let key = key.clone();
        self.actor
            .try_call(move |state| state.delete(&key))
            .instrument(span)
            .await
    }

    async fn watch(&self, key: E::Key) -> StoreResult<Snapshots<Option<E>>> {
        self.actor.try_call(move |state| state.watch(key)).await
    }
}

impl<E: Entity> std::fmt::Debug for KvEntityStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvEntityStore")
            .field("entity_type", &E::NAME)
            .field("actor", &self.actor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::catalogue::{CastMember, Credits, Movie};
    use crate::clock::ManualClock;
    use crate::ports::WriteBatch;
    use fake::Fake;
    use fake::faker::lorem::en::Sentence;
    use futures::StreamExt;
    use shared::StoreError;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn movie(id: u64, title: &str) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            overview: Sentence(3..8).fake(),
            ..Movie::default()
        }
    }

    async fn next_snapshot<T>(snapshots: &mut Snapshots<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), snapshots.next())
            .await
            .unwrap()
            .unwrap()
    }

    fn store<E: Entity>(backend: &MemoryBackend, clock: &ManualClock) -> KvEntityStore<E> {
        KvEntityStore::new(backend, Arc::new(clock.clone()), StoreConfig::new(DAY)).unwrap()
    }

    #[tokio::test]
    async fn test_read_within_ttl_returns_payload() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);

        movies.write(42, movie(42, "X")).await.unwrap();
        clock.advance(HOUR);

        let found = movies.read(&42).await.unwrap().unwrap();
        assert_eq!(found.title, "X");
    }

    #[tokio::test]
    async fn test_stale_read_misses_and_deletes_record() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);

        movies.write(42, movie(42, "X")).await.unwrap();
        clock.advance(DAY + HOUR);

        assert_eq!(movies.read(&42).await.unwrap(), None);
        let tree = backend.open_tree("movie").unwrap();
        assert_eq!(tree.get(&42u64.to_bytes()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_exact_ttl_boundary_is_stale() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);

        movies.write(1, movie(1, "X")).await.unwrap();
        clock.advance(DAY);

        assert_eq!(movies.read(&1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_record_with_latest_payload() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);

        movies.write(42, movie(42, "X")).await.unwrap();
        clock.advance(20 * HOUR);
        movies.write(42, movie(42, "Y")).await.unwrap();
        // fresh relative to the second write only
        clock.advance(10 * HOUR);

        assert_eq!(movies.read(&42).await.unwrap().unwrap().title, "Y");
        let tree = backend.open_tree("movie").unwrap();
        assert_eq!(tree.scan_prefix(&[]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_children_are_replaced_wholesale() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let credits = store::<Credits>(&backend, &clock);

        let cast = |names: &[&str]| -> Vec<CastMember> {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| CastMember {
                    id: i as u64,
                    name: name.to_string(),
                    character: String::new(),
                    order: i as u32,
                })
                .collect()
        };

        credits
            .write(7, Credits { movie_id: 7, cast: cast(&["a", "b", "c"]), crew: Vec::new() })
            .await
            .unwrap();
        credits
            .write(7, Credits { movie_id: 7, cast: cast(&["d"]), crew: Vec::new() })
            .await
            .unwrap();

        let stored = credits.read(&7).await.unwrap().unwrap();
        assert_eq!(stored.cast.len(), 1);
        assert_eq!(stored.cast[0].name, "d");
    }

    #[tokio::test]
    async fn test_entity_types_do_not_share_records() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);
        let credits = store::<Credits>(&backend, &clock);

        movies.write(7, movie(7, "X")).await.unwrap();

        assert_eq!(credits.read(&7).await.unwrap(), None);
        assert!(movies.read(&7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_watch_emits_current_then_each_write_in_order() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);

        let mut snapshots = movies.watch(42).await.unwrap();
        movies.write(42, movie(42, "W1")).await.unwrap();
        movies.write(43, movie(43, "elsewhere")).await.unwrap();
        movies.write(42, movie(42, "W2")).await.unwrap();
        movies.delete(&42).await.unwrap();

        assert_eq!(snapshots.next().await.unwrap(), None);
        assert_eq!(snapshots.next().await.unwrap().unwrap().title, "W1");
        assert_eq!(snapshots.next().await.unwrap().unwrap().title, "W2");
        assert_eq!(snapshots.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch_starts_with_cached_value() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);
        movies.write(1, movie(1, "cached")).await.unwrap();

        let mut snapshots = movies.watch(1).await.unwrap();

        assert_eq!(snapshots.next().await.unwrap().unwrap().title, "cached");
    }

    #[tokio::test]
    async fn test_stale_eviction_notifies_watchers() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);
        movies.write(1, movie(1, "old")).await.unwrap();

        let mut snapshots = movies.watch(1).await.unwrap();
        clock.advance(DAY);
        assert_eq!(movies.read(&1).await.unwrap(), None);

        assert!(snapshots.next().await.unwrap().is_some());
        assert_eq!(snapshots.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watchers_see_writes_from_another_store_over_the_tree() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let writer = store::<Movie>(&backend, &clock);
        let reader = store::<Movie>(&backend, &clock);

        let mut snapshots = reader.watch(9).await.unwrap();
        writer.write(9, movie(9, "shared")).await.unwrap();
        writer.write(10, movie(10, "unwatched")).await.unwrap();
        writer.delete(&9).await.unwrap();

        assert_eq!(next_snapshot(&mut snapshots).await, None);
        assert_eq!(next_snapshot(&mut snapshots).await.unwrap().title, "shared");
        assert_eq!(next_snapshot(&mut snapshots).await, None);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);
        movies.write(1, movie(1, "X")).await.unwrap();

        movies.close().await;

        assert_eq!(movies.read(&1).await, Err(StoreError::Closed));
        assert_eq!(backend.changes().listener_count("movie"), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_not_an_error() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);

        assert!(!movies.delete(&99).await.unwrap());
    }

    #[tokio::test]
    async fn test_change_feed_reports_writes_and_evictions() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let feed = EventFeed::new(16);
        let mut events = feed.subscribe();
        let movies: KvEntityStore<Movie> = KvEntityStore::new(
            &backend,
            Arc::new(clock.clone()),
            StoreConfig::new(DAY).with_events(feed.clone()),
        )
        .unwrap();

        movies.write(5, movie(5, "X")).await.unwrap();
        clock.advance(DAY);
        movies.read(&5).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), StoreEvent::Written(e) if e.key == "5"));
        assert!(matches!(
            events.recv().await.unwrap(),
            StoreEvent::Removed(e) if e.reason == RemovalReason::Expired
        ));
    }

    struct BrokenTree;

    impl KvTree for BrokenTree {
        fn get(&self, _key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
            Err(StoreError::Storage("io error".to_string()))
        }
        fn insert(&self, _key: &[u8], _value: Vec<u8>) -> StoreResult<()> {
            Err(StoreError::Storage("io error".to_string()))
        }
        fn remove(&self, _key: &[u8]) -> StoreResult<bool> {
            Err(StoreError::Storage("io error".to_string()))
        }
        fn scan_prefix(&self, _prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
            Err(StoreError::Storage("io error".to_string()))
        }
        fn apply_batch(&self, _batch: WriteBatch) -> StoreResult<()> {
            Err(StoreError::Storage("io error".to_string()))
        }
    }

    #[derive(Default)]
    struct BrokenBackend {
        changes: TreeChanges,
    }

    impl KvBackend for BrokenBackend {
        fn open_tree(&self, _name: &str) -> StoreResult<Arc<dyn KvTree>> {
            Ok(Arc::new(BrokenTree))
        }

        fn changes(&self) -> &TreeChanges {
            &self.changes
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_distinct_from_miss() {
        let movies: KvEntityStore<Movie> = KvEntityStore::new(
            &BrokenBackend::default(),
            Arc::new(ManualClock::default()),
            StoreConfig::new(DAY),
        )
        .unwrap();

        assert!(matches!(movies.read(&1).await, Err(StoreError::Storage(_))));
        assert!(matches!(movies.write(1, movie(1, "X")).await, Err(StoreError::Storage(_))));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_serialization_error() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::default();
        let movies = store::<Movie>(&backend, &clock);
        backend
            .open_tree("movie")
            .unwrap()
            .insert(&3u64.to_bytes(), b"not json".to_vec())
            .unwrap();

        assert!(matches!(movies.read(&3).await, Err(StoreError::Serialization(_))));
    }
}
