use super::actor::StoreActor;
use super::{Closeable, StoreConfig, decode, encode};
use crate::changes::{ListenerId, TouchedKeys, TreeChanges};
use crate::clock::Clock;
use crate::domain::{CacheKey, CacheRecord, Entity, PageEntry, PagedList};
use crate::events::{EventFeed, PageEvent, StoreEvent};
use crate::ports::{KvBackend, KvTree, PagedStore, WriteBatch};
use crate::stream::{Snapshots, Subscribers};
use async_trait::async_trait;
use chrono::TimeDelta;
use shared::{StoreError, StoreResult};
use std::sync::Arc;
use tracing::{Instrument, debug, debug_span, field, warn};

type ItemKey<L> = <<L as PagedList>::Item as Entity>::Key;
type ItemRecord<L> = CacheRecord<ItemKey<L>, <L as PagedList>::Item>;

/// Page entry keys are `parent ++ page ++ position`, so a prefix scan over the
/// parent yields entries in page order and position order within a page.
fn parent_prefix<P: CacheKey>(parent: &P) -> Vec<u8> {
    parent.to_bytes()
}

fn page_prefix<P: CacheKey>(parent: &P, page: u32) -> Vec<u8> {
    let mut key = parent.to_bytes();
    key.extend_from_slice(&page.to_be_bytes());
    key
}

fn entry_key<P: CacheKey>(parent: &P, page: u32, position: u32) -> Vec<u8> {
    let mut key = page_prefix(parent, page);
    key.extend_from_slice(&position.to_be_bytes());
    key
}

fn page_of(key: &[u8], parent_len: usize) -> StoreResult<u32> {
    key.get(parent_len..parent_len + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| StoreError::Storage(format!("malformed page entry key {:?}", key)))
}

struct PagedState<L: PagedList> {
    pages: Arc<dyn KvTree>,
    items: Arc<dyn KvTree>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    subscribers: Subscribers<L::Parent, Option<usize>, Vec<L::Item>>,
    events: Option<EventFeed>,
    changes: TreeChanges,
    listener: ListenerId,
}

impl<L: PagedList> PagedState<L> {
    fn read(&mut self, parent: &L::Parent, page: u32) -> StoreResult<Option<Vec<L::Item>>> {
        let rows = self.pages.scan_prefix(&page_prefix(parent, page))?;
        if rows.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now();
        let mut items = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let entry: PageEntry<ItemKey<L>> = decode(&value)?;
            if !entry.is_fresh(now, self.ttl) {
                debug!(list = L::NAME, parent = %parent, page, "Page entry is stale");
                self.invalidate_from(parent, page)?;
                return Ok(None);
            }

            match self.item(&entry.item)? {
                Some(record) if record.is_fresh(now, self.ttl) => items.push(record.payload),
                _ => {
                    debug!(
                        list = L::NAME,
                        parent = %parent,
                        page,
                        item = %entry.item,
                        "Page references a stale or missing item"
                    );
                    self.invalidate_from(parent, page)?;
                    return Ok(None);
                }
            }
        }

        Ok(Some(items))
    }

    fn write(&mut self, parent: L::Parent, page: u32, items: Vec<L::Item>) -> StoreResult<()> {
        if !self.extends_prefix(&parent, page)? {
            debug!(list = L::NAME, parent = %parent, page, "Page does not follow the cached pages, not caching it");
            return Ok(());
        }
        let now = self.clock.now();

        // items are shared with every other page and list that references them
        let mut touched = Vec::with_capacity(items.len());
        for item in &items {
            let record = CacheRecord::new(item.key(), item.clone(), now);
            let raw = record.key.to_bytes();
            self.items.insert(&raw, encode(&record)?)?;
            touched.push(raw);
        }
        self.changes.publish(<L::Item as Entity>::NAME, self.listener, touched);

        let mut batch = self.removals_from(&parent, page)?;
        for (position, item) in items.iter().enumerate() {
            let entry = PageEntry::new(item.key(), now);
            batch.insert(entry_key(&parent, page, position as u32), encode(&entry)?);
        }
        self.pages.apply_batch(batch)?;

        debug!(list = L::NAME, parent = %parent, page, count = items.len(), "Wrote page");
        self.publish(|store, parent| {
            StoreEvent::PageWritten(PageEvent {
                store,
                parent,
                page,
                timestamp: now,
            })
        }, &parent);
        self.notify(&parent);
        Ok(())
    }

    /// Pages are 1-based and cached as a contiguous run starting at page 1
    fn extends_prefix(&self, parent: &L::Parent, page: u32) -> StoreResult<bool> {
        match page {
            0 => Ok(false),
            1 => Ok(true),
            _ => Ok(!self.pages.scan_prefix(&page_prefix(parent, page - 1))?.is_empty()),
        }
    }

    fn current_page(&self, parent: &L::Parent) -> StoreResult<Option<u32>> {
        let prefix = parent_prefix(parent);
        match self.pages.scan_prefix(&prefix)?.last() {
            Some((key, _)) => Ok(Some(page_of(key, prefix.len())?)),
            None => Ok(None),
        }
    }

    /// Delete every page `>= page` of `parent`
    fn invalidate_from(&mut self, parent: &L::Parent, page: u32) -> StoreResult<usize> {
        let batch = self.removals_from(parent, page)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let removed = batch.len();
        self.pages.apply_batch(batch)?;

        debug!(list = L::NAME, parent = %parent, from_page = page, removed, "Invalidated pages");
        let timestamp = self.clock.now();
        self.publish(|store, parent| {
            StoreEvent::PagesInvalidated(PageEvent {
                store,
                parent,
                page,
                timestamp,
            })
        }, parent);
        self.notify(parent);
        Ok(removed)
    }

    fn removals_from(&self, parent: &L::Parent, page: u32) -> StoreResult<WriteBatch> {
        let prefix = parent_prefix(parent);
        let mut batch = WriteBatch::new();
        for (key, _) in self.pages.scan_prefix(&prefix)? {
            if page_of(&key, prefix.len())? >= page {
                batch.remove(key);
            }
        }
        Ok(batch)
    }

    fn item(&self, key: &ItemKey<L>) -> StoreResult<Option<ItemRecord<L>>> {
        match self.items.get(&key.to_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every cached page of `parent` concatenated in page order
    fn flatten(&self, parent: &L::Parent) -> StoreResult<Vec<L::Item>> {
        let mut flattened = Vec::new();
        for (_, value) in self.pages.scan_prefix(&parent_prefix(parent))? {
            let entry: PageEntry<ItemKey<L>> = decode(&value)?;
            if let Some(record) = self.item(&entry.item)? {
                flattened.push(record.payload);
            }
        }
        Ok(flattened)
    }

    fn watch(&mut self, parent: L::Parent, limit: Option<usize>) -> StoreResult<Snapshots<Vec<L::Item>>> {
        let current = truncated(self.flatten(&parent)?, limit);
        Ok(self.subscribers.subscribe(parent, limit, current))
    }

    /// Another store rewrote or dropped item records
    fn on_items_changed(&mut self, keys: TouchedKeys) {
        for parent in self.subscribers.keys() {
            match self.references_any(&parent, &keys) {
                Ok(true) => self.notify(&parent),
                Ok(false) => {}
                Err(e) => {
                    warn!(list = L::NAME, parent = %parent, error = %e, "Could not check pages for changed items");
                }
            }
        }
    }

    fn references_any(&self, parent: &L::Parent, keys: &TouchedKeys) -> StoreResult<bool> {
        for (_, value) in self.pages.scan_prefix(&parent_prefix(parent))? {
            let entry: PageEntry<ItemKey<L>> = decode(&value)?;
            if keys.contains(&entry.item.to_bytes()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn notify(&mut self, parent: &L::Parent) {
        if !self.subscribers.is_watched(parent) {
            return;
        }

        match self.flatten(parent) {
            Ok(flattened) => {
                self.subscribers
                    .notify(parent, |limit| truncated(flattened.clone(), *limit));
            }
            Err(e) => {
                warn!(list = L::NAME, parent = %parent, error = %e, "Could not project pages for watchers");
            }
        }
    }

    fn publish(&self, event: impl FnOnce(String, String) -> StoreEvent, parent: &L::Parent) {
        if let Some(events) = &self.events {
            events.publish(event(L::NAME.to_string(), parent.to_string()));
        }
    }
}

fn truncated<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

/// [`PagedStore`] keeping page entries in `<list>.pages` and the items
/// themselves in the item entity's tree
pub struct KvPagedStore<L: PagedList> {
    actor: StoreActor<PagedState<L>>,
}

impl<L: PagedList> KvPagedStore<L> {
    pub fn pages_tree_name() -> String {
        format!("{}.pages", L::NAME)
    }

    /// Must be called from within a Tokio runtime
    pub fn new(backend: &dyn KvBackend, clock: Arc<dyn Clock>, config: StoreConfig) -> StoreResult<Self> {
        let changes = backend.changes().clone();
        let (listener, touched) = changes.listen(<L::Item as Entity>::NAME);
        let state = PagedState {
            pages: backend.open_tree(&Self::pages_tree_name())?,
            items: backend.open_tree(<L::Item as Entity>::NAME)?,
            ttl: config.ttl_delta(),
            clock,
            subscribers: Subscribers::new(),
            events: config.events,
            changes,
            listener,
        };

        Ok(Self {
            actor: StoreActor::spawn_listening(
                L::NAME,
                state,
                config.mailbox_capacity,
                touched,
                PagedState::<L>::on_items_changed,
            )?,
        })
    }
}

#[async_trait]
impl<L: PagedList> Closeable for KvPagedStore<L> {
    async fn close(&self) {
        self.actor.close().await;
    }
}

#[async_trait]
impl<L: PagedList> PagedStore<L> for KvPagedStore<L> {
    async fn read(&self, parent: &L::Parent, page: u32) -> StoreResult<Option<Vec<L::Item>>> {
        let span = debug_span!(
            "paged_store.read",
            entity_type = L::NAME,
            entity_id = %parent,
            page,
            cache.hit = field::Empty
        );
        let parent = parent.clone();
        let result = self
            .actor
            .try_call(move |state| state.read(&parent, page))
            .instrument(span.clone())
            .await;
        if let Ok(found) = &result {
            span.record("cache.hit", found.is_some());
        }
        result
    }

    async fn write(&self, parent: L::Parent, page: u32, items: Vec<L::Item>) -> StoreResult<()> {
        let span = debug_span!("paged_store.write", entity_type = L::NAME, entity_id = %parent, page);
        self.actor
            .try_call(move |state| state.write(parent, page, items))
            .instrument(span)
            .await
    }

    async fn current_page(&self, parent: &L::Parent) -> StoreResult<Option<u32>> {
        let parent = parent.clone();
        self.actor
            .try_call(move |state| state.current_page(&parent))
            .await
    }

    async fn clear(&self, parent: &L::Parent) -> StoreResult<usize> {
        let span = debug_span!("paged_store.clear", entity_type = L::NAME, entity_id = %parent);
        let parent = parent.clone();
        self.actor
            .try_call(move |state| state.invalidate_from(&parent, 0))
            .instrument(span)
            .await
    }

    async fn watch(
        &self,
        parent: L::Parent,
        limit: Option<usize>,
    ) -> StoreResult<Snapshots<Vec<L::Item>>> {
        self.actor
            .try_call(move |state| state.watch(parent, limit))
            .await
    }
}

impl<L: PagedList> std::fmt::Debug for KvPagedStore<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvPagedStore")
            .field("list", &L::NAME)
            .field("actor", &self.actor)
            .finish()
    }
}
