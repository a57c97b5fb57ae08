//! Cache-aside data layer for a media catalogue client.
//!
//! Stores keep remote catalogue data locally with TTL freshness, paginated
//! lists with forward cascade invalidation, and local membership collections.
//! Repositories sit on top and fall back to a remote source on a miss.

pub mod backend;
pub mod changes;
pub mod catalogue;
pub mod clock;
pub mod domain;
pub mod events;
pub mod factory;
pub mod ports;
pub mod repository;
pub mod stores;
pub mod stream;
pub mod telemetry;

pub use backend::MemoryBackend;
pub use changes::TreeChanges;
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{CacheKey, CacheRecord, Collection, Entity, Global, PageEntry, PagedList, SetRecord};
pub use events::{EventFeed, StoreEvent};
pub use factory::StoreFactory;
pub use ports::{EntityStore, KvBackend, KvTree, PagedStore, RemotePagedSource, RemoteSource, SetStore};
pub use repository::{
    CacheAsideRepository, CollectionRepository, EntityRepository, PagedCacheAsideRepository,
    PagedRepository,
};
pub use stores::{Closeable, KvEntityStore, KvPagedStore, KvSetStore, StoreConfig};
pub use stream::Snapshots;
