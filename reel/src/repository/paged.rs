use super::PagedRepository;
use crate::domain::PagedList;
use crate::ports::{PagedStore, RemotePagedSource};
use crate::stream::Snapshots;
use crate::telemetry::record_outcome;
use async_trait::async_trait;
use shared::{RepositoryError, Result};
use std::sync::Arc;
use tracing::{Instrument, Span, debug, field, info_span, warn};

/// Cache-aside repository for one paginated list
pub struct PagedCacheAsideRepository<L: PagedList> {
    store: Arc<dyn PagedStore<L>>,
    remote: Arc<dyn RemotePagedSource<L>>,
}

impl<L: PagedList> Clone for PagedCacheAsideRepository<L> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            remote: self.remote.clone(),
        }
    }
}

impl<L: PagedList> PagedCacheAsideRepository<L> {
    pub fn new(store: Arc<dyn PagedStore<L>>, remote: Arc<dyn RemotePagedSource<L>>) -> Self {
        Self { store, remote }
    }

    /// Load the page after the last cached one, or page 1 when nothing is cached.
    /// Returns the page number alongside its items.
    pub async fn next_page(&self, parent: &L::Parent) -> Result<(u32, Vec<L::Item>)> {
        let page = match self.store.current_page(parent).await? {
            Some(current) => current.saturating_add(1),
            None => 1,
        };
        let items = self.list(parent, page).await?;
        Ok((page, items))
    }

    pub async fn current_page(&self, parent: &L::Parent) -> Result<Option<u32>> {
        Ok(self.store.current_page(parent).await?)
    }

    /// Fetch `page` from the remote source even if it is cached.
    /// Every later cached page is dropped. Pages start at 1; page 0 is `NotFound`.
    pub async fn refresh(&self, parent: &L::Parent, page: u32) -> Result<Vec<L::Item>> {
        let span = info_span!(
            "repository.refresh_page",
            entity_type = L::NAME,
            entity_id = %parent,
            page,
            cache.write_error = field::Empty,
            error = field::Empty,
            otel.status_code = field::Empty
        );

        let result = self.fetch_and_store(parent, page).instrument(span.clone()).await;
        record_outcome(&span, &result);
        result
    }

    /// Flattened live view of every cached page, optionally capped at `limit` items
    pub async fn watch(&self, parent: L::Parent, limit: Option<usize>) -> Result<Snapshots<Vec<L::Item>>> {
        Ok(self.store.watch(parent, limit).await?)
    }

    /// Drop every cached page of `parent`
    pub async fn invalidate(&self, parent: &L::Parent) -> Result<usize> {
        Ok(self.store.clear(parent).await?)
    }

    async fn lookup(&self, parent: &L::Parent, page: u32) -> Result<Vec<L::Item>> {
        let cached = self.store.read(parent, page).await?;
        Span::current().record("cache.hit", cached.is_some());
        if let Some(items) = cached {
            return Ok(items);
        }

        debug!(entity_type = L::NAME, entity_id = %parent, page, "Page miss, fetching from remote");
        self.fetch_and_store(parent, page).await
    }

    async fn fetch_and_store(&self, parent: &L::Parent, page: u32) -> Result<Vec<L::Item>> {
        first_page_is_one(page)?;
        let items = self.remote.fetch_page(parent, page).await?;

        if let Err(e) = self.store.write(parent.clone(), page, items.clone()).await {
            Span::current().record("cache.write_error", field::display(&e));
            warn!(
                entity_type = L::NAME,
                entity_id = %parent,
                page,
                error = %e,
                "Failed to cache remote page"
            );
        }

        Ok(items)
    }
}

fn first_page_is_one(page: u32) -> Result<()> {
    if page == 0 {
        debug!(page, "Pages start at 1");
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

#[async_trait]
impl<L: PagedList> PagedRepository<L> for PagedCacheAsideRepository<L> {
    async fn list(&self, parent: &L::Parent, page: u32) -> Result<Vec<L::Item>> {
        let span = info_span!(
            "repository.list",
            entity_type = L::NAME,
            entity_id = %parent,
            page,
            cache.hit = field::Empty,
            cache.write_error = field::Empty,
            error = field::Empty,
            otel.status_code = field::Empty
        );

        let result = self.lookup(parent, page).instrument(span.clone()).await;
        record_outcome(&span, &result);
        result
    }
}
