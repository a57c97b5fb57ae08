use crate::clock::{Clock, SystemClock};
use crate::domain::{Collection, Entity, PagedList};
use crate::events::EventFeed;
use crate::ports::{KvBackend, RemotePagedSource, RemoteSource};
use crate::repository::{CacheAsideRepository, CollectionRepository, PagedCacheAsideRepository};
use crate::stores::{Closeable, KvEntityStore, KvPagedStore, KvSetStore, StoreConfig};
use parking_lot::Mutex;
use shared::StoreResult;
use shared::config::CacheSettings;
use std::sync::Arc;
use tracing::info;

/// Builds stores and repositories over one shared backend.
///
/// Each store's TTL is resolved from [`CacheSettings`] by its entity, list or
/// collection name. All builders must be called from within a Tokio runtime.
/// Every store built here stays open until [`close`](Self::close).
#[derive(Clone)]
pub struct StoreFactory {
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    events: Option<EventFeed>,
    opened: Arc<Mutex<Vec<Arc<dyn Closeable>>>>,
}

impl StoreFactory {
    pub fn new(backend: Arc<dyn KvBackend>, settings: CacheSettings) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock), settings)
    }

    pub fn with_clock(backend: Arc<dyn KvBackend>, clock: Arc<dyn Clock>, settings: CacheSettings) -> Self {
        Self {
            backend,
            clock,
            settings,
            events: None,
            opened: Arc::default(),
        }
    }

    /// Publish changes of every store built from now on to a shared change feed
    pub fn with_event_feed(mut self) -> Self {
        self.events = Some(EventFeed::new(self.settings.event_capacity));
        self
    }

    pub fn event_feed(&self) -> Option<&EventFeed> {
        self.events.as_ref()
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Stop every store built so far and release their hold on the backend
    pub async fn close(&self) {
        let opened = std::mem::take(&mut *self.opened.lock());
        info!("Closing {} stores", opened.len());
        for store in opened {
            store.close().await;
        }
    }

    fn track<S: Closeable + 'static>(&self, store: S) -> Arc<S> {
        let store = Arc::new(store);
        self.opened.lock().push(store.clone());
        store
    }

    fn config(&self, name: &str) -> StoreConfig {
        let mut config = StoreConfig::new(self.settings.ttl_for(name))
            .with_mailbox_capacity(self.settings.mailbox_capacity);
        if let Some(events) = &self.events {
            config = config.with_events(events.clone());
        }
        config
    }

    pub fn entity_store<E: Entity>(&self) -> StoreResult<Arc<KvEntityStore<E>>> {
        let config = self.config(E::NAME);
        info!("Opening entity store '{}' with ttl {:?}", E::NAME, config.ttl);
        Ok(self.track(KvEntityStore::new(self.backend.as_ref(), self.clock.clone(), config)?))
    }

    pub fn paged_store<L: PagedList>(&self) -> StoreResult<Arc<KvPagedStore<L>>> {
        let config = self.config(L::NAME);
        info!("Opening paged store '{}' with ttl {:?}", L::NAME, config.ttl);
        Ok(self.track(KvPagedStore::new(self.backend.as_ref(), self.clock.clone(), config)?))
    }

    pub fn set_store<C: Collection>(&self) -> StoreResult<Arc<KvSetStore<C>>> {
        info!("Opening collection store '{}'", C::NAME);
        Ok(self.track(KvSetStore::new(self.backend.as_ref(), self.clock.clone(), self.config(C::NAME))?))
    }

    pub fn entity_repository<E: Entity>(
        &self,
        remote: Arc<dyn RemoteSource<E>>,
    ) -> StoreResult<CacheAsideRepository<E>> {
        Ok(CacheAsideRepository::new(self.entity_store::<E>()?, remote))
    }

    pub fn paged_repository<L: PagedList>(
        &self,
        remote: Arc<dyn RemotePagedSource<L>>,
    ) -> StoreResult<PagedCacheAsideRepository<L>> {
        Ok(PagedCacheAsideRepository::new(self.paged_store::<L>()?, remote))
    }

    pub fn collection_repository<C: Collection>(&self) -> StoreResult<CollectionRepository<C>> {
        Ok(CollectionRepository::new(self.set_store::<C>()?))
    }
}

impl std::fmt::Debug for StoreFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFactory")
            .field("backend", &"<dyn KvBackend>")
            .field("settings", &self.settings)
            .field("events", &self.events.is_some())
            .field("open_stores", &self.opened.lock().len())
            .finish()
    }
}
