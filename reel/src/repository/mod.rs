//! Cache-aside repositories.
//!
//! A repository reads its store first and only asks the remote source on a
//! miss, writing the fetched value back before returning it. Failures from
//! either side are reported as [`shared::RepositoryError`].

mod collection;
mod entity;
mod paged;

#[cfg(test)]
pub(crate) mod testing;

pub use collection::CollectionRepository;
pub use entity::CacheAsideRepository;
pub use paged::PagedCacheAsideRepository;

use crate::domain::{Entity, PagedList};
use async_trait::async_trait;
use shared::Result;

/// Single-entity lookup
#[async_trait]
pub trait EntityRepository<E: Entity>: Send + Sync {
    /// Fails only when neither the cache nor the remote source can produce a value
    async fn get(&self, key: &E::Key) -> Result<E>;
}

/// Page-by-page lookup of a list
#[async_trait]
pub trait PagedRepository<L: PagedList>: Send + Sync {
    async fn list(&self, parent: &L::Parent, page: u32) -> Result<Vec<L::Item>>;
}
