use super::EntityRepository;
use crate::domain::Entity;
use crate::ports::{EntityStore, RemoteSource};
use crate::stream::Snapshots;
use crate::telemetry::record_outcome;
use async_trait::async_trait;
use shared::Result;
use std::sync::Arc;
use tracing::{Instrument, Span, debug, field, info_span, warn};

/// Cache-aside repository for one entity type
pub struct CacheAsideRepository<E: Entity> {
    store: Arc<dyn EntityStore<E>>,
    remote: Arc<dyn RemoteSource<E>>,
}

impl<E: Entity> Clone for CacheAsideRepository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            remote: self.remote.clone(),
        }
    }
}

impl<E: Entity> CacheAsideRepository<E> {
    pub fn new(store: Arc<dyn EntityStore<E>>, remote: Arc<dyn RemoteSource<E>>) -> Self {
        Self { store, remote }
    }

    /// Fetch from the remote source regardless of what is cached, then cache it
    pub async fn refresh(&self, key: &E::Key) -> Result<E> {
        let span = info_span!(
            "repository.refresh",
            entity_type = E::NAME,
            entity_id = %key,
            cache.write_error = field::Empty,
            error = field::Empty,
            otel.status_code = field::Empty
        );

        let result = self.fetch_and_store(key).instrument(span.clone()).await;
        record_outcome(&span, &result);
        result
    }

    /// Live view of the cached value. Never consults the remote source.
    pub async fn watch(&self, key: E::Key) -> Result<Snapshots<Option<E>>> {
        Ok(self.store.watch(key).await?)
    }

    /// Drop the cached value so the next `get` goes to the remote source
    pub async fn invalidate(&self, key: &E::Key) -> Result<bool> {
        Ok(self.store.delete(key).await?)
    }

    async fn lookup(&self, key: &E::Key) -> Result<E> {
        // a broken store fails the request, it is not a miss
        let cached = self.store.read(key).await?;
        Span::current().record("cache.hit", cached.is_some());
        if let Some(value) = cached {
            return Ok(value);
        }

        debug!(entity_type = E::NAME, entity_id = %key, "Cache miss, fetching from remote");
        self.fetch_and_store(key).await
    }

    async fn fetch_and_store(&self, key: &E::Key) -> Result<E> {
        let value = self.remote.fetch(key).await?;

        if let Err(e) = self.store.write(key.clone(), value.clone()).await {
            Span::current().record("cache.write_error", field::display(&e));
            warn!(
                entity_type = E::NAME,
                entity_id = %key,
                error = %e,
                "Failed to cache remote value"
            );
        }

        Ok(value)
    }
}

#[async_trait]
impl<E: Entity> EntityRepository<E> for CacheAsideRepository<E> {
    async fn get(&self, key: &E::Key) -> Result<E> {
        let span = info_span!(
            "repository.get",
            entity_type = E::NAME,
            entity_id = %key,
            cache.hit = field::Empty,
            cache.write_error = field::Empty,
            error = field::Empty,
            otel.status_code = field::Empty
        );

        let result = self.lookup(key).instrument(span.clone()).await;
        record_outcome(&span, &result);
        result
    }
}
