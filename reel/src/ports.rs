#![deny(clippy::all)]

use crate::changes::TreeChanges;
use crate::domain::{Collection, Entity, PagedList, SetRecord};
use crate::stream::Snapshots;
use async_trait::async_trait;
use shared::{RemoteError, StoreResult};
use std::sync::Arc;

// Ports are the pluggable seams: physical storage below the stores, the
// stores themselves below the repositories, and the remote catalogue.

/// Single mutation inside a [`WriteBatch`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Insert(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

/// Mutations applied to one tree atomically, in order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Insert(key, value));
    }

    pub fn remove(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Remove(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// One named keyspace of the physical store
pub trait KvTree: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;
    fn insert(&self, key: &[u8], value: Vec<u8>) -> StoreResult<()>;
    /// Returns whether the key was present
    fn remove(&self, key: &[u8]) -> StoreResult<bool>;
    /// All entries whose key starts with `prefix`, in ascending key order
    fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
    fn apply_batch(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// Physical store shared by every entity store
/// Each store only ever touches the trees it opened by name
pub trait KvBackend: Send + Sync + 'static {
    fn open_tree(&self, name: &str) -> StoreResult<Arc<dyn KvTree>>;
    /// Change announcements shared by every store over this backend
    fn changes(&self) -> &TreeChanges;
}

/// TTL-aware store holding one record per entity identity
#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync + 'static {
    /// Fresh value, or `None` on a miss. Stale records are deleted, never returned.
    async fn read(&self, key: &E::Key) -> StoreResult<Option<E>>;
    /// Upsert. Aggregates are replaced wholesale, nested children included.
    async fn write(&self, key: E::Key, value: E) -> StoreResult<()>;
    async fn delete(&self, key: &E::Key) -> StoreResult<bool>;
    async fn watch(&self, key: E::Key) -> StoreResult<Snapshots<Option<E>>>;
}

/// Paginated list store with forward cascade invalidation
#[async_trait]
pub trait PagedStore<L: PagedList>: Send + Sync + 'static {
    async fn read(&self, parent: &L::Parent, page: u32) -> StoreResult<Option<Vec<L::Item>>>;
    /// Replaces `page` and drops every later page of `parent`.
    /// A page that would leave a gap after the cached pages is not stored.
    async fn write(&self, parent: L::Parent, page: u32, items: Vec<L::Item>) -> StoreResult<()>;
    async fn current_page(&self, parent: &L::Parent) -> StoreResult<Option<u32>>;
    /// Removes every page of `parent`, returning the number of entries dropped
    async fn clear(&self, parent: &L::Parent) -> StoreResult<usize>;
    async fn watch(
        &self,
        parent: L::Parent,
        limit: Option<usize>,
    ) -> StoreResult<Snapshots<Vec<L::Item>>>;
}

/// Membership store without expiry
#[async_trait]
pub trait SetStore<C: Collection>: Send + Sync + 'static {
    /// Most recently added first
    async fn all(&self) -> StoreResult<Vec<SetRecord<C::Id>>>;
    async fn contains(&self, id: &C::Id) -> StoreResult<bool>;
    /// Returns false when `id` was already a member
    async fn add(&self, id: C::Id) -> StoreResult<bool>;
    /// Returns false when `id` was not a member
    async fn remove(&self, id: &C::Id) -> StoreResult<bool>;
    async fn watch(&self) -> StoreResult<Snapshots<Vec<SetRecord<C::Id>>>>;
}

/// Remote catalogue lookup for a single entity
#[async_trait]
pub trait RemoteSource<E: Entity>: Send + Sync + 'static {
    async fn fetch(&self, key: &E::Key) -> Result<E, RemoteError>;
}

/// Remote catalogue lookup for one page of a list
#[async_trait]
pub trait RemotePagedSource<L: PagedList>: Send + Sync + 'static {
    async fn fetch_page(&self, parent: &L::Parent, page: u32) -> Result<Vec<L::Item>, RemoteError>;
}
